use std::time::Instant;

use eyre::eyre;
use midb_session::{
    selection::{LineWindow, SourceCodeState},
    ConsoleEntryKind, ConnectionState, ExprType, Outbound, ProtocolRecord, RecordBatcher, RecordKind,
    RunState, Session, SessionConfig, SourceJob, SourceWindow,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::info;

fn session_with(config: SessionConfig) -> (Session, UnboundedReceiver<Outbound>) {
    midb_common::logging::ensure_test_logging(None);
    let (tx, rx) = unbounded_channel();
    let mut session = Session::new(config, tx);
    session.on_connect();
    (session, rx)
}

fn connected() -> (Session, UnboundedReceiver<Outbound>) {
    session_with(SessionConfig::default())
}

/// Commands and file reads emitted since the last call
fn drain(rx: &mut UnboundedReceiver<Outbound>) -> (Vec<String>, Vec<SourceJob>) {
    let mut commands = Vec::new();
    let mut reads = Vec::new();
    while let Ok(out) = rx.try_recv() {
        match out {
            Outbound::Commands(batch) => commands.extend(batch),
            Outbound::ReadSource(job) => reads.push(job),
        }
    }
    (commands, reads)
}

fn done(token: Option<u64>, payload: Value) -> ProtocolRecord {
    ProtocolRecord::result(token, "done", payload)
}

fn error(token: Option<u64>, msg: &str) -> ProtocolRecord {
    ProtocolRecord::result(token, "error", json!({ "msg": msg }))
}

fn stopped(payload: Value) -> ProtocolRecord {
    ProtocolRecord::async_record(RecordKind::AsyncExec, None, "stopped", payload)
}

fn created(name: &str, value: &str, var_type: &str, numchild: u32) -> ProtocolRecord {
    done(
        Some(3),
        json!({
            "name": name,
            "numchild": numchild.to_string(),
            "value": value,
            "type": var_type,
            "thread-id": "1",
            "has_more": "0",
        }),
    )
}

fn hundred_lines() -> String {
    (1..=100).map(|i| format!("int line{i};")).collect::<Vec<_>>().join("\n")
}

#[test]
fn test_created_root_variable() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("x", ExprType::Watch);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["-enable-pretty-printing", "3-var-create - * \"x\""]);

    session.handle(&[created("var3", "10", "int", 0)]);
    let roots = session.variables().roots();
    assert_eq!(roots.len(), 1);
    let var3 = &roots[0];
    assert_eq!(var3.name, "var3");
    assert_eq!(var3.expression.as_deref(), Some("x"));
    assert!(var3.is_int);
    assert_eq!(var3.radix, 10);
    assert_eq!(var3.values, vec![10.0]);

    // nothing to expand, and the creation queue is free again
    session.create_variable("y", ExprType::Watch);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["-enable-pretty-printing", "3-var-create - * \"y\""]);
}

#[test]
fn test_creations_are_serialized() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("a", ExprType::Watch);
    session.create_variable("b", ExprType::Watch);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands.iter().filter(|c| c.starts_with("3-var-create")).count(), 1);

    session.handle(&[created("var1", "1", "int", 0)]);
    let (commands, _) = drain(&mut rx);
    assert!(commands.contains(&"3-var-create - * \"b\"".to_string()));
}

#[test]
fn test_hover_failures_are_silent() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("nope", ExprType::Hover);
    session.handle(&[error(Some(3), "No symbol \"nope\" in current context.")]);
    assert!(session.drain_console().iter().all(|e| e.kind != ConsoleEntryKind::StdErr));

    session.create_variable("nope", ExprType::Watch);
    session.handle(&[error(Some(3), "No symbol \"nope\" in current context.")]);
    let console = session.drain_console();
    assert!(console
        .iter()
        .any(|e| e.kind == ConsoleEntryKind::StdErr && e.text.contains("No symbol \"nope\"")));
    drain(&mut rx);
}

#[test]
fn test_children_and_anonymous_expansion() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("s", ExprType::Watch);
    session.handle(&[created("var1", "{...}", "struct S", 2)]);
    let (commands, _) = drain(&mut rx);
    assert!(commands.contains(&"5-var-list-children --all-values \"var1\"".to_string()));

    session.handle(&[done(
        Some(5),
        json!({
            "numchild": "2",
            "has_more": "0",
            "children": [
                {"name": "var1.a", "exp": "a", "numchild": "0", "value": "1", "type": "int"},
                {"name": "var1.2_anonymous", "exp": "<anonymous union>", "numchild": "1", "type": "union {...}"},
            ],
        }),
    )]);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["5-var-list-children --all-values \"var1.2_anonymous\""]);

    session.handle(&[done(
        Some(5),
        json!({
            "numchild": "1",
            "has_more": "0",
            "children": [{"name": "var1.2_anonymous.u", "exp": "u", "numchild": "0", "value": "7", "type": "int"}],
        }),
    )]);

    let tree = session.variables();
    assert_eq!(tree.find("var1.2_anonymous.u").map(|n| n.value.as_str()), Some("7"));
    assert!(tree.find("var1.2_anonymous").unwrap().show_children_in_ui);
    assert!(tree.find("var1.b").is_none());
    assert_eq!(session.full_expression_path("var1.a").as_deref(), Some("s.a"));
}

#[test]
fn test_failed_child_listing_releases_queue() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("a", ExprType::Watch);
    session.handle(&[created("var1", "{...}", "struct A", 1)]);
    session.create_variable("b", ExprType::Watch);
    session.handle(&[created("var2", "{...}", "struct B", 1)]);
    let (commands, _) = drain(&mut rx);
    assert!(commands.contains(&"5-var-list-children --all-values \"var1\"".to_string()));
    assert!(!commands.contains(&"5-var-list-children --all-values \"var2\"".to_string()));

    session.handle(&[error(Some(5), "Variable object not found")]);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["5-var-list-children --all-values \"var2\""]);
}

#[test]
fn test_collapse_keeps_children() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("s", ExprType::Watch);
    session.handle(&[created("var1", "{...}", "struct S", 1)]);
    session.handle(&[done(
        Some(5),
        json!({"numchild": "1", "has_more": "0", "children": [{"name": "var1.x", "exp": "x", "numchild": "0", "value": "1", "type": "int"}]}),
    )]);
    drain(&mut rx);

    session.toggle_children("var1");
    assert!(!session.variables().find("var1").unwrap().show_children_in_ui);
    assert_eq!(session.variables().find("var1").unwrap().children.len(), 1);

    session.toggle_children("var1");
    assert!(session.variables().find("var1").unwrap().show_children_in_ui);
    let (commands, _) = drain(&mut rx);
    assert!(commands.is_empty());
}

#[test]
fn test_changelist_updates_and_removals() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.create_variable("i", ExprType::Watch);
    session.handle(&[created("var1", "1", "int", 0)]);
    drain(&mut rx);

    session.handle(&[done(
        Some(1),
        json!({"changelist": [{"name": "var1", "value": "2", "in_scope": "true", "type_changed": "false", "has_more": "0"}]}),
    )]);
    assert_eq!(session.variables().find("var1").unwrap().values, vec![1.0, 2.0]);

    session.handle(&[done(
        Some(1),
        json!({"changelist": [{"name": "var1", "in_scope": "true", "has_more": "1"}]}),
    )]);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["5-var-list-children --all-values \"var1\""]);

    session.handle(&[done(Some(1), json!({"changelist": [{"name": "var1", "in_scope": "invalid"}]}))]);
    assert!(session.variables().is_empty());

    // stale names are dropped quietly
    session.handle(&[done(Some(1), json!({"changelist": [{"name": "var9", "value": "1"}]}))]);
    assert!(session.drain_console().iter().all(|e| e.kind != ConsoleEntryKind::StdErr));
}

#[test]
fn test_ignored_errors_are_invisible() {
    info!("Running test");
    let (mut session, _rx) = connected();
    let record = error(Some(1), "No registers.");
    session.handle(std::slice::from_ref(&record));
    session.handle(std::slice::from_ref(&record));

    assert_eq!(session.state().status, None);
    assert!(session.drain_console().is_empty());
    // still audited
    assert_eq!(session.audit().len(), 2);
}

#[test]
fn test_ignored_only_batch_publishes_nothing() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[done(None, json!({}))]);
    assert!(session.take_snapshot().is_some());

    session.handle(&[error(Some(1), "No registers."), error(Some(1), "No stack.")]);
    assert!(session.take_snapshot().is_none());

    session.handle(&[error(Some(1), "No stack."), done(None, json!({}))]);
    assert!(session.take_snapshot().is_some());
}

#[test]
fn test_status_uses_last_non_ignored_record() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[
        error(None, "The program is not being run."),
        done(Some(1), json!({})),
        error(Some(1), "No stack."),
    ]);
    let status = session.state().status.clone().unwrap();
    assert_eq!(status.text, "done");
    assert!(!status.error);
}

#[test]
fn test_program_exit_clears_state_and_locals() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.expand_local("i");
    session.handle(&[created("var1", "3", "int", 0)]);
    session.create_variable("g", ExprType::Watch);
    session.handle(&[created("var2", "5", "int", 0)]);
    session.handle(&[
        done(Some(1), json!({"threads": [{"id": "1", "target-id": "process 42", "state": "stopped"}], "current-thread-id": "1"})),
        done(Some(1), json!({"register-names": ["rax", "rbx"]})),
        done(Some(1), json!({"register-values": [{"number": "0", "value": "0x1"}]})),
    ]);
    assert_eq!(session.state().threads.len(), 1);
    drain(&mut rx);

    session.handle(&[stopped(json!({"reason": "exited-normally"}))]);

    let state = session.state();
    assert_eq!(state.run_state, RunState::Exited);
    assert!(state.threads.is_empty());
    assert!(state.register_names.is_empty());
    assert!(state.current_register_values.is_empty());
    assert_eq!(state.current_thread_id, None);
    let names: Vec<_> = session.variables().roots().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["var2"]);

    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["-var-delete var1"]);
}

#[test]
fn test_expand_local_toggles_existing_root() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.expand_local("s");
    session.handle(&[created("var1", "{...}", "struct S", 1)]);
    drain(&mut rx);

    session.expand_local("s");
    assert!(!session.variables().find("var1").unwrap().show_children_in_ui);
    let (commands, _) = drain(&mut rx);
    assert!(commands.is_empty());
}

#[test]
fn test_breakpoint_created_replaces_duplicates() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    let bkpt = |number: &str| {
        done(None, json!({"bkpt": {"number": number, "type": "breakpoint", "func": "main", "file": "main.c", "fullname": "/src/main.c", "line": "5"}}))
    };

    session.handle(&[bkpt("1")]);
    let (commands, reads) = drain(&mut rx);
    assert_eq!(commands, vec!["-break-list"]);
    assert_eq!(reads, vec![SourceJob { fullname: "/src/main.c".into(), start_line: 1, end_line: 501 }]);

    session.handle(&[bkpt("2")]);
    let (commands, reads) = drain(&mut rx);
    assert_eq!(commands, vec!["-break-delete 1", "-break-list"]);
    assert!(reads.is_empty());
    let numbers: Vec<_> = session.state().breakpoints.iter().map(|b| b.number.as_str()).collect();
    assert_eq!(numbers, vec!["2"]);
}

#[test]
fn test_pause_fetches_source_window_once() {
    info!("Running test");
    let config = SessionConfig { max_lines_of_code_to_fetch: 20, ..Default::default() };
    let (mut session, mut rx) = session_with(config);
    session.handle(&[stopped(json!({
        "reason": "end-stepping-range",
        "thread-id": "1",
        "frame": {"addr": "0x401136", "func": "main", "file": "main.c", "fullname": "/src/main.c", "line": "50"},
    }))]);
    assert_eq!(session.state().run_state, RunState::Paused);
    assert_eq!(session.state().source_code_state, SourceCodeState::FetchingSource);

    let (commands, reads) = drain(&mut rx);
    assert!(commands.contains(&"1-thread-info".to_string()));
    let job = SourceJob { fullname: "/src/main.c".into(), start_line: 40, end_line: 60 };
    assert_eq!(reads, vec![job.clone()]);

    let window = SourceWindow::from_text(&job, &hundred_lines(), None);
    session.on_source_read(job, Ok(window));
    assert_eq!(session.state().source_code_state, SourceCodeState::SourceCached);
    assert_eq!(session.state().source_window, Some(LineWindow { start: 40, end: 60, line: 50 }));

    session.set_line(55);
    let (_, reads) = drain(&mut rx);
    assert!(reads.is_empty());
    assert_eq!(session.state().source_code_state, SourceCodeState::SourceCached);
}

#[test]
fn test_unreadable_file_is_missing() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.view_file("/src/gone.c", 3);
    let (_, reads) = drain(&mut rx);
    assert_eq!(reads.len(), 1);

    session.on_source_read(reads[0].clone(), Err(eyre!("Failed to read /src/gone.c")));
    assert_eq!(session.state().source_code_state, SourceCodeState::FileMissing);
    assert!(session.sources().is_missing("/src/gone.c"));
    assert!(session.drain_console().iter().any(|e| e.kind == ConsoleEntryKind::StdErr));

    // never retried
    session.view_file("/src/gone.c", 4);
    let (_, reads) = drain(&mut rx);
    assert!(reads.is_empty());
}

#[test]
fn test_raw_disassembly_failure_is_not_retried() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    let pause = stopped(json!({"reason": "breakpoint-hit", "frame": {"addr": "0x401000", "func": "??"}}));
    session.handle(std::slice::from_ref(&pause));
    assert_eq!(session.state().source_code_state, SourceCodeState::FetchingAssembly);
    let (commands, _) = drain(&mut rx);
    assert!(commands.contains(&"2-data-disassemble -s 0x401000 -e 0x401064 -- 0".to_string()));

    session.handle(&[error(Some(2), "Cannot access memory at address 0x401000")]);
    assert_eq!(session.state().source_code_state, SourceCodeState::AssemblyUnavailable);

    session.handle(std::slice::from_ref(&pause));
    let (commands, _) = drain(&mut rx);
    assert!(!commands.iter().any(|c| c.starts_with("2-data-disassemble")));
    assert_eq!(session.state().source_code_state, SourceCodeState::AssemblyUnavailable);

    // an explicit reload forgets the failure
    session.clear_cached_assembly();
    let (commands, _) = drain(&mut rx);
    assert!(commands.iter().any(|c| c.starts_with("2-data-disassemble")));
}

#[test]
fn test_raw_disassembly_is_cached() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.handle(&[stopped(json!({"reason": "breakpoint-hit", "frame": {"addr": "0x401000", "func": "??"}}))]);
    drain(&mut rx);
    session.handle(&[done(
        Some(2),
        json!({"asm_insns": [
            {"address": "0x0000000000401000", "func-name": "_start", "offset": "0", "inst": "xor %ebp,%ebp"},
            {"address": "0x0000000000401002", "func-name": "_start", "offset": "2", "inst": "mov %rdx,%r9"},
        ]}),
    )]);
    assert_eq!(session.state().source_code_state, SourceCodeState::AssemblyCached);
}

#[test]
fn test_signal_offers_backtrace() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.handle(&[stopped(json!({
        "reason": "signal-received",
        "signal-name": "SIGSEGV",
        "signal-meaning": "Segmentation fault",
        "frame": {"addr": "0x401136", "func": "main", "fullname": "/src/main.c", "line": "7"},
    }))]);
    assert_eq!(session.state().run_state, RunState::Paused);
    let console = session.drain_console();
    assert!(console.iter().any(|e| e.kind == ConsoleEntryKind::BacktraceLink));
    assert!(console.iter().any(|e| e.text.contains("SIGSEGV")));

    drain(&mut rx);
    session.backtrace();
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands[0], "backtrace");
}

#[test]
fn test_interrupt_signal_is_quiet() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[stopped(json!({"reason": "signal-received", "signal-name": "SIGINT", "signal-meaning": "Interrupt"}))]);
    assert_eq!(session.state().run_state, RunState::Paused);
    assert!(session.drain_console().iter().all(|e| e.kind != ConsoleEntryKind::BacktraceLink));
}

#[test]
fn test_version_detection_and_mode_fallback() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.handle(&[ProtocolRecord::stream(RecordKind::ConsoleStream, "GNU gdb (Ubuntu 12.1-0ubuntu1~22.04) 12.1\n")]);
    assert_eq!(session.state().gdb_version.as_deref(), Some("12.1"));
    assert_eq!(session.state().gdb_version_parts, vec![12, 1]);

    session.view_file("/src/a.c", 10);
    session.show_assembly_for_current_line();
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["4-data-disassemble -f /src/a.c -l 10 -n 1000 -- 4"]);

    session.handle(&[error(Some(4), "Mode argument must be 0, 1, 2, or 3.")]);
    let (commands, _) = drain(&mut rx);
    assert_eq!(commands, vec!["4-data-disassemble -f /src/a.c -l 10 -n 1000 -- 3"]);
}

#[test]
fn test_source_file_list() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[done(
        None,
        json!({"files": [
            {"file": "b.rs", "fullname": "/src/b.rs"},
            {"file": "a.rs", "fullname": "/src/a.rs"},
            {"file": "a.rs", "fullname": "/src/a.rs"},
            {"file": "crt.S"},
        ]}),
    )]);
    assert_eq!(session.state().source_file_paths, vec!["/src/a.rs", "/src/b.rs"]);
    assert_eq!(session.state().language, midb_session::state::Language::Rust);

    session.handle(&[done(None, json!({"files": []}))]);
    assert!(session.drain_console().iter().any(|e| e.text.contains("without debug symbols")));
}

#[test]
fn test_autocomplete_batch() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[
        ProtocolRecord::stream(RecordKind::LogStream, "complete info b\n"),
        ProtocolRecord::stream(RecordKind::ConsoleStream, "info breakpoints\n"),
        ProtocolRecord::stream(RecordKind::ConsoleStream, "info bookmarks\n"),
        done(None, Value::Null),
    ]);
    assert_eq!(session.state().autocomplete_options, vec!["info breakpoints", "info bookmarks"]);
    assert!(session.drain_console().is_empty());
}

#[test]
fn test_missing_binary_means_exited() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.load_binary("/tmp/a.out", "");
    session.handle(&[error(None, "/tmp/a.out: No such file or directory.")]);
    assert_eq!(session.state().run_state, RunState::Exited);
}

#[test]
fn test_loading_a_binary_forgets_the_previous_program() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.expand_local("i");
    session.handle(&[created("var1", "3", "int", 0)]);
    session.handle(&[
        stopped(json!({"reason": "breakpoint-hit", "frame": {"addr": "0x401136", "func": "main"}})),
        done(Some(1), json!({"threads": [{"id": "1", "target-id": "process 42", "state": "stopped"}], "current-thread-id": "1"})),
        done(None, json!({"files": [{"file": "a.c", "fullname": "/src/a.c"}]})),
    ]);
    assert!(session.state().paused_on_frame.is_some());
    drain(&mut rx);

    session.load_binary("/tmp/b.out", "");
    let state = session.state();
    assert_eq!(state.run_state, RunState::Exited);
    assert_eq!(state.paused_on_frame, None);
    assert!(state.threads.is_empty());
    assert!(state.source_file_paths.is_empty());
    assert_eq!(state.inferior_binary.as_deref(), Some("/tmp/b.out"));
    assert!(session.variables().is_empty());

    let (commands, _) = drain(&mut rx);
    assert_eq!(commands[0], "-var-delete var1");
    assert!(commands.contains(&"-file-exec-and-symbols /tmp/b.out".to_string()));
}

#[test]
fn test_paused_frame_without_source_ignores_user_file() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.view_file("/src/main.c", 10);
    assert_eq!(session.state().source_code_state, SourceCodeState::FetchingSource);
    drain(&mut rx);

    session.handle(&[stopped(json!({"reason": "breakpoint-hit"}))]);
    assert_eq!(session.state().source_code_state, SourceCodeState::NoneAvailable);
}

#[test]
fn test_mach_task_port_error_adds_codesign_hint() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.handle(&[error(None, "Unable to find Mach task port for process-id 123: (os/kern) failure (0x5).")]);
    let console = session.drain_console();
    assert_eq!(console.len(), 2);
    assert_eq!(console[0].kind, ConsoleEntryKind::StdErr);
    assert_eq!(console[1].kind, ConsoleEntryKind::ToolOutput);
    assert!(console[1].text.contains("codesigned"));
}

#[test]
fn test_remote_connected_continues_to_main() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    session.handle(&[ProtocolRecord::result(None, "connected", Value::Null)]);
    let (commands, _) = drain(&mut rx);
    let tail: Vec<_> = commands.iter().rev().take(3).rev().cloned().collect();
    assert_eq!(tail, vec!["-break-insert main", "-exec-continue", "-break-list"]);
    assert_eq!(session.state().run_state, RunState::Running);
}

#[test]
fn test_watchdog_reports_once() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.continue_();
    let deadline = session.watchdog_deadline().unwrap();
    assert!(!session.check_watchdog(Instant::now()));
    assert!(session.check_watchdog(deadline));
    assert!(!session.check_watchdog(deadline));

    let console = session.drain_console();
    assert_eq!(console[0].kind, ConsoleEntryKind::ToolOutput);
    assert_eq!(console[0].text, "No gdb response received after 10 seconds.");
    assert!(!session.state().waiting_for_response);
}

#[test]
fn test_response_disarms_watchdog() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.next();
    assert!(session.watchdog_deadline().is_some());
    session.handle(&[ProtocolRecord::result(None, "running", Value::Null)]);
    assert!(session.watchdog_deadline().is_none());
    assert_eq!(session.state().run_state, RunState::Running);
}

#[test]
fn test_commands_buffer_until_connected() {
    info!("Running test");
    midb_common::logging::ensure_test_logging(None);
    let (tx, mut rx) = unbounded_channel();
    let mut session = Session::new(SessionConfig::default(), tx);
    session.run_initial_commands(Some("source ~/.gdbinit"));
    session.step();
    assert!(rx.try_recv().is_err());

    session.on_connect();
    assert_eq!(
        rx.try_recv().unwrap(),
        Outbound::Commands(vec![
            "set breakpoint pending on".into(),
            "source ~/.gdbinit".into(),
            "-exec-step".into()
        ])
    );
}

#[test]
fn test_disconnect_ends_session() {
    info!("Running test");
    let (mut session, _rx) = connected();
    session.interrupt();
    session.on_disconnect();
    assert_eq!(session.state().connection, ConnectionState::Disconnected);
    assert!(session.watchdog_deadline().is_none());
    assert!(session.drain_console().iter().any(|e| e.kind == ConsoleEntryKind::StdErr && e.text.contains("closed")));
}

#[test]
fn test_decoded_batch_end_to_end() {
    info!("Running test");
    let (mut session, mut rx) = connected();
    let mut batcher = RecordBatcher::new();
    let lines = [
        r#"=thread-group-started,id="i1",pid="4242""#,
        r#"*stopped,reason="breakpoint-hit",disp="keep",bkptno="1",frame={addr="0x0000000000401136",func="main",args=[],file="hello.c",fullname="/tmp/hello.c",line="5",arch="i386:x86-64"},thread-id="1",stopped-threads="all",core="3""#,
    ];
    for line in lines {
        assert!(batcher.push_line(line).is_none());
    }
    let batch = batcher.push_line("(gdb)").unwrap();
    session.handle(&batch);

    let state = session.state();
    assert_eq!(state.inferior_pid.as_deref(), Some("4242"));
    assert_eq!(state.run_state, RunState::Paused);
    assert_eq!(state.current_thread_id.as_deref(), Some("1"));
    assert_eq!(
        state.status.as_ref().map(|s| s.text.as_str()),
        Some("stopped, breakpoint-hit, file: hello.c, func: main, line: 5, addr: 0x0000000000401136")
    );
    let (_, reads) = drain(&mut rx);
    assert_eq!(reads[0].fullname, "/tmp/hello.c");
}
