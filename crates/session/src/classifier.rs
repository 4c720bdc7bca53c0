// MIDB - GDB Machine Interface Frontend
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Routing of response batches into session state.
//!
//! `^done` payloads carry no type tag, so they are recognized by the fields
//! they contain. Every entry of [`SHAPES`] whose predicate holds is applied,
//! in table order. A payload matching nothing is logged and otherwise
//! ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::{
    console::ConsoleEntryKind,
    queue::ChildrenJob,
    record::{str_field, ProtocolRecord, RecordKind, Stream},
    session::Session,
    source::{AsmInstruction, SourceAsmLine},
    state::{Breakpoint, Frame, Language, LocalVariable, RunState, StatusLine, Thread},
    token::SentinelToken,
    varobj::{ChangeOutcome, ExprType, VarObj},
};

static GDB_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"GNU gdb \(.*\)\s+([0-9|.]*)\n").unwrap_or_else(|_| unreachable!("valid version regex"))
});

/// Old gdb rejects disassembly mode 4 with this message
const MODE_ARGUMENT_ERROR: &str = "Mode argument must be 0, 1, 2, or 3.";
const MACH_TASK_PORT_ERROR: &str = "Unable to find Mach task port";
const CODESIGN_HINT: &str = "gdb must be codesigned to debug on macOS. Follow the instructions at https://github.com/cs01/gdbgui/issues/55#issuecomment-288209648 to fix this error.";

const STATUS_KEYS: [&str; 4] = ["msg", "reason", "signal-name", "signal-meaning"];
const STATUS_FRAME_KEYS: [&str; 4] = ["file", "func", "line", "addr"];

const NO_SOURCE_FILES: &str =
    "Either no executable is loaded or the executable was compiled without debug symbols.";

/// A recognizable `^done` payload
struct Shape {
    name: &'static str,
    matches: fn(&ProtocolRecord) -> bool,
    apply: fn(&mut Session, &ProtocolRecord),
}

const SHAPES: &[Shape] = &[
    Shape { name: "breakpoint", matches: |r| r.has("bkpt"), apply: Session::on_breakpoint_created },
    Shape { name: "breakpoint-table", matches: |r| r.has("BreakpointTable"), apply: Session::on_breakpoint_table },
    Shape { name: "stack", matches: |r| r.has("stack"), apply: Session::on_stack },
    Shape { name: "threads", matches: |r| r.has("threads"), apply: Session::on_threads },
    Shape { name: "register-names", matches: |r| r.has("register-names"), apply: Session::on_register_names },
    Shape { name: "register-values", matches: |r| r.has("register-values"), apply: Session::on_register_values },
    Shape { name: "disassembly", matches: |r| r.has("asm_insns"), apply: Session::on_disassembly },
    Shape { name: "source-files", matches: |r| r.has("files"), apply: Session::on_source_files },
    Shape { name: "memory", matches: |r| r.has("memory"), apply: Session::on_memory },
    Shape { name: "locals", matches: |r| r.has("variables"), apply: Session::on_locals },
    Shape { name: "changelist", matches: |r| r.has("changelist"), apply: Session::on_changelist },
    Shape { name: "children", matches: is_children_list, apply: Session::on_children },
    Shape {
        name: "new-variable",
        matches: |r| r.has("name") && !is_children_list(r),
        apply: Session::on_variable_created,
    },
];

fn is_children_list(r: &ProtocolRecord) -> bool {
    r.has("has_more")
        && r.has("numchild")
        && (r.has("children") || SentinelToken::ListChildren.matches(r.token))
}

fn list<'a>(r: &'a ProtocolRecord, key: &str) -> impl Iterator<Item = &'a Value> {
    r.field(key).and_then(Value::as_array).into_iter().flatten()
}

/// Human-readable summary of a record, as used by the status line and for
/// surfaced errors
pub fn describe(r: &ProtocolRecord) -> String {
    let mut parts = Vec::new();
    if !r.is_error() {
        parts.extend(r.message().map(str::to_string));
    }
    for key in STATUS_KEYS {
        parts.extend(r.payload_str(key).map(str::to_string));
    }
    if let Some(frame) = r.field("frame") {
        for key in STATUS_FRAME_KEYS {
            if let Some(value) = str_field(frame, key) {
                parts.push(format!("{key}: {value}"));
            }
        }
    }
    parts.join(", ")
}

fn status_line(r: &ProtocolRecord) -> Option<StatusLine> {
    let text = describe(r);
    (!text.is_empty()).then(|| StatusLine { text, error: r.is_error() })
}

/// Completions, if the batch is the answer to a `complete` command
pub fn autocomplete_options(records: &[ProtocolRecord]) -> Option<Vec<String>> {
    let (first, rest) = records.split_first()?;
    let (last, middle) = rest.split_last()?;
    let echoed = first.kind == RecordKind::LogStream && first.text().is_some_and(|t| t.starts_with("complete "));
    if !echoed || !last.is_done_result() || last.stream != Stream::Stdout {
        return None;
    }
    middle
        .iter()
        .map(|r| match (r.kind, r.message(), r.stream, r.text()) {
            (RecordKind::ConsoleStream, None, Stream::Stdout, Some(text)) => Some(text.replace('\n', "")),
            _ => None,
        })
        .collect()
}

impl Session {
    /// Process one batch of records in arrival order
    pub fn handle(&mut self, records: &[ProtocolRecord]) {
        if records.is_empty() {
            return;
        }
        self.dispatcher.on_response();
        if std::mem::take(&mut self.state.waiting_for_response) {
            self.mark_dirty();
        }
        for record in records {
            self.audit.record(record);
        }

        if let Some(options) = autocomplete_options(records) {
            debug!(count = options.len(), "Autocomplete options");
            self.state.autocomplete_options = options;
            self.mark_dirty();
            return;
        }

        let mut last = None;
        for record in records {
            if record.is_error() && SentinelToken::IgnoreErrors.matches(record.token) {
                trace!(msg = ?record.error_msg(), "Ignoring expected error");
                continue;
            }
            self.mark_dirty();
            self.handle_record(record);
            last = Some(record);
        }

        if let Some(status) = last.and_then(status_line) {
            self.state.status = Some(status);
        }
    }

    fn handle_record(&mut self, r: &ProtocolRecord) {
        if r.is_error() {
            self.on_error(r);
            return;
        }
        match (r.kind, r.message()) {
            (RecordKind::Result, Some("done")) => self.on_done(r),
            (RecordKind::Result, Some("connected")) => self.on_remote_connected(),
            (RecordKind::Result | RecordKind::AsyncExec, Some("running")) => {
                self.state.run_state = RunState::Running;
            }
            (RecordKind::AsyncExec | RecordKind::AsyncNotify, Some("stopped")) => self.on_stopped(r),
            (RecordKind::AsyncNotify, Some("thread-group-started")) => {
                self.state.inferior_pid = r.payload_str("pid").map(str::to_string);
            }
            (kind, _) if kind.is_stream() => self.on_stream(r),
            (kind, message) => trace!(?kind, ?message, "Record needs no handling"),
        }
    }

    fn on_stream(&mut self, r: &ProtocolRecord) {
        let Some(text) = r.text() else {
            return;
        };
        if r.kind == RecordKind::ConsoleStream && self.state.gdb_version.is_none() {
            if let Some(captures) = GDB_VERSION.captures(text) {
                let version = captures[1].to_string();
                info!(%version, "Detected gdb version");
                self.state.gdb_version_parts = version.split('.').filter_map(|p| p.parse().ok()).collect();
                self.state.gdb_version = Some(version);
            }
        }
        let kind = match r.stream {
            Stream::Stderr => ConsoleEntryKind::StdErr,
            Stream::Stdout => ConsoleEntryKind::StdOut,
        };
        self.print(kind, text.strip_suffix('\n').unwrap_or(text));
    }

    fn on_error(&mut self, r: &ProtocolRecord) {
        let msg = r.error_msg().unwrap_or_default();
        match SentinelToken::from_token(r.token) {
            Some(SentinelToken::CreateVar) => {
                let settled = self.create_queue.settle();
                let hover = settled.finished.as_ref().is_some_and(|job| job.expr_type == ExprType::Hover);
                if !hover {
                    self.print(ConsoleEntryKind::StdErr, msg);
                }
                if let Some(next) = settled.next {
                    self.start_create(next);
                }
            }
            Some(SentinelToken::ListChildren) => {
                let settled = self.children_queue.settle();
                debug!(job = ?settled.finished, %msg, "Listing children failed");
                if let Some(next) = settled.next {
                    self.start_children(next);
                }
            }
            Some(SentinelToken::RawDisassembly) => {
                let addr = self.sources.mark_raw_fetch_failed();
                debug!(?addr, %msg, "Raw disassembly failed");
                self.render_source();
            }
            Some(SentinelToken::InlineDisassembly) if msg.contains(MODE_ARGUMENT_ERROR) => {
                info!("gdb does not support disassembly mode 4, retrying with mode 3");
                self.state.gdb_version_parts = vec![7, 6, 0];
                self.show_assembly_for_current_line();
            }
            _ => self.surface_error(r),
        }
    }

    fn surface_error(&mut self, r: &ProtocolRecord) {
        self.print(ConsoleEntryKind::StdErr, describe(r));
        if r.error_msg().is_some_and(|msg| msg.starts_with(MACH_TASK_PORT_ERROR)) {
            self.print(ConsoleEntryKind::ToolOutput, CODESIGN_HINT);
        }
        let binary_missing = self
            .state
            .inferior_binary
            .as_deref()
            .is_some_and(|binary| r.error_msg() == Some(format!("{binary}: No such file or directory.").as_str()));
        if binary_missing {
            self.inferior_program_exited();
        }
    }

    fn on_done(&mut self, r: &ProtocolRecord) {
        let mut matched = false;
        for shape in SHAPES {
            if (shape.matches)(r) {
                trace!(shape = shape.name, "Matched done payload");
                (shape.apply)(self, r);
                matched = true;
            }
        }
        if !matched {
            match r.payload_object() {
                Some(payload) if !payload.is_empty() => warn!(payload = %r.payload, "Unrecognized done payload"),
                _ => trace!("Done without payload"),
            }
        }
    }

    fn on_stopped(&mut self, r: &ProtocolRecord) {
        let frame = r.field("frame").and_then(Frame::from_mi);
        match r.payload_str("reason") {
            Some(reason) if reason.contains("exited") => self.inferior_program_exited(),
            Some("breakpoint-hit" | "end-stepping-range") => {
                if let Some(thread) = r.payload_str("thread-id") {
                    self.state.current_thread_id = Some(thread.to_string());
                }
                self.program_paused(frame);
            }
            Some("signal-received") => {
                self.program_paused(frame);
                let name = r.payload_str("signal-name").unwrap_or_default();
                if name != "SIGINT" {
                    let meaning = r.payload_str("signal-meaning").unwrap_or_default();
                    self.console.extend(
                        ConsoleEntryKind::ToolOutput,
                        [
                            format!("midb noticed a signal was received ({meaning}, {name})."),
                            "If the program exited due to a fault, you can attempt to re-enter the state of the program when the fault occurred.".to_string(),
                            "Run :backtrace to do so.".to_string(),
                        ],
                    );
                    self.console.push(ConsoleEntryKind::BacktraceLink, "Re-Enter Program (backtrace)");
                }
            }
            Some(reason) => {
                warn!(%reason, "Unhandled stop reason");
                self.program_paused(frame);
            }
            None => self.program_paused(frame),
        }
    }

    fn on_remote_connected(&mut self) {
        self.program_paused(None);
        if self.config.auto_add_breakpoint_to_main {
            self.print(ConsoleEntryKind::ToolOutput, "Connected to remote target! Adding breakpoint to main, and continuing.");
            self.state.run_state = RunState::Running;
            self.send(["-break-insert main", "-exec-continue", "-break-list"]);
        } else {
            self.print(
                ConsoleEntryKind::ToolOutput,
                "Connected to remote target! Add breakpoint(s), then press :continue (do not :run).",
            );
        }
    }

    // ---- done shapes ----------------------------------------------------

    fn on_breakpoint_created(&mut self, r: &ProtocolRecord) {
        let Some(bkpt) = r.field("bkpt").and_then(Breakpoint::from_mi) else {
            return;
        };
        let mut commands: Vec<String> = self
            .state
            .breakpoints
            .iter()
            .filter(|b| b.number != bkpt.number && b.same_location(&bkpt))
            .map(|b| format!("-break-delete {}", b.number))
            .collect();
        self.state.breakpoints.retain(|b| !b.same_location(&bkpt) && b.number != bkpt.number);

        let location = bkpt.fullname.clone().map(|f| (f, bkpt.line_number().unwrap_or(1)));
        self.state.breakpoints.push(bkpt);
        if let Some((fullname, line)) = location {
            self.view_file(&fullname, line);
        }
        commands.push("-break-list".to_string());
        self.send(commands);
    }

    fn on_breakpoint_table(&mut self, r: &ProtocolRecord) {
        let body = r.field("BreakpointTable").and_then(|t| t.get("body")).and_then(Value::as_array);
        self.state.breakpoints = body.into_iter().flatten().filter_map(Breakpoint::from_mi).collect();
    }

    fn on_stack(&mut self, r: &ProtocolRecord) {
        let stack: Vec<Frame> = list(r, "stack").filter_map(Frame::from_mi).collect();
        let frame = stack.get(self.state.selected_frame_num).or_else(|| stack.first()).cloned();
        self.state.stack = stack;
        if let Some(frame) = frame {
            self.state.fullname_to_render = frame.fullname.clone();
            self.state.line_of_source_to_flash = frame.line_number();
            self.state.current_assembly_address = frame.addr.clone();
            self.state.paused_on_frame = Some(frame);
            self.render_source();
        }
    }

    fn on_threads(&mut self, r: &ProtocolRecord) {
        self.state.threads = list(r, "threads")
            .filter_map(|t| serde_json::from_value::<Thread>(t.clone()).ok())
            .collect();
        if let Some(id) = r.payload_str("current-thread-id") {
            self.state.current_thread_id = Some(id.to_string());
        }
    }

    fn on_register_names(&mut self, r: &ProtocolRecord) {
        self.state.register_names =
            list(r, "register-names").map(|n| n.as_str().unwrap_or_default().to_string()).collect();
    }

    fn on_register_values(&mut self, r: &ProtocolRecord) {
        self.state.previous_register_values = std::mem::take(&mut self.state.current_register_values);
        self.state.current_register_values = list(r, "register-values")
            .filter_map(|v| Some((str_field(v, "number")?.to_string(), str_field(v, "value")?.to_string())))
            .collect();
    }

    fn on_disassembly(&mut self, r: &ProtocolRecord) {
        let Some(insns) = r.field("asm_insns").cloned() else {
            return;
        };
        if SentinelToken::RawDisassembly.matches(r.token) {
            match serde_json::from_value::<Vec<AsmInstruction>>(insns) {
                Ok(insns) => {
                    let start = self.sources.raw_addr_being_fetched().or_else(|| insns.first().and_then(AsmInstruction::addr));
                    match start {
                        Some(start) => self.sources.save_raw_disassembly(start, insns),
                        None => debug!("Raw disassembly without an address"),
                    }
                }
                Err(e) => debug!(%e, "Unexpected raw disassembly shape"),
            }
        } else {
            match serde_json::from_value::<Vec<SourceAsmLine>>(insns) {
                Ok(lines) => {
                    let file = self.sources.save_file_assembly(lines);
                    debug!(?file, "Cached source disassembly");
                }
                Err(e) => debug!(%e, "Unexpected source disassembly shape"),
            }
        }
        self.render_source();
    }

    fn on_source_files(&mut self, r: &ProtocolRecord) {
        let mut paths: Vec<String> =
            list(r, "files").filter_map(|f| str_field(f, "fullname")).map(str::to_string).collect();
        paths.sort();
        paths.dedup();

        if paths.is_empty() {
            self.print(ConsoleEntryKind::StdErr, NO_SOURCE_FILES);
        } else {
            self.state.language = Language::detect(paths.iter().map(String::as_str));
            if self.state.language == Language::Rust && self.state.gdb_version_parts.starts_with(&[7, 12]) {
                self.print(
                    ConsoleEntryKind::ToolOutput,
                    "Warning: Due to a bug in gdb 7.12, registers cannot be fetched for Rust programs.",
                );
                self.state.can_fetch_register_values = false;
            }
        }
        self.state.source_file_paths = paths;
    }

    fn on_memory(&mut self, r: &ProtocolRecord) {
        for entry in list(r, "memory") {
            let begin = str_field(entry, "begin").and_then(crate::source::parse_address);
            if let (Some(begin), Some(contents)) = (begin, str_field(entry, "contents")) {
                self.state.memory_cache.insert(begin, contents.to_string());
            }
        }
    }

    fn on_locals(&mut self, r: &ProtocolRecord) {
        self.state.locals = list(r, "variables").filter_map(LocalVariable::from_mi).collect();
    }

    fn on_changelist(&mut self, r: &ProtocolRecord) {
        for entry in list(r, "changelist") {
            match self.vars.apply_change(entry) {
                ChangeOutcome::Updated { refetch_children: true } => {
                    let job = str_field(entry, "name")
                        .and_then(|name| self.vars.find(name))
                        .map(|node| ChildrenJob { parent: node.name.clone(), expr_type: node.expr_type });
                    if let Some(job) = job {
                        self.enqueue_children(job);
                    }
                }
                ChangeOutcome::Removed => {
                    debug!(name = ?str_field(entry, "name"), "Variable went out of scope for good");
                }
                ChangeOutcome::Updated { .. } | ChangeOutcome::Unknown => {}
            }
        }
    }

    fn on_children(&mut self, r: &ProtocolRecord) {
        let settled = self.children_queue.settle();
        if let Some(next) = settled.next {
            self.start_children(next);
        }
        let Some(job) = settled.finished else {
            debug!("Children listed without a pending request");
            return;
        };

        let children: Vec<VarObj> = list(r, "children")
            .filter_map(|c| VarObj::from_mi(c, Some(&job.parent), job.expr_type))
            .collect();
        match self.vars.set_children(&job.parent, children) {
            Some(anonymous) if self.config.auto_expand_anonymous => {
                for name in anonymous {
                    self.expand(&name);
                }
            }
            Some(_) => {}
            None => debug!(parent = %job.parent, "Children for a variable no longer in the tree"),
        }
    }

    fn on_variable_created(&mut self, r: &ProtocolRecord) {
        let settled = self.create_queue.settle();
        match settled.finished {
            Some(job) => match VarObj::from_mi(&r.payload, None, job.expr_type) {
                Some(obj) => self.insert_created_root(&job, obj),
                None => debug!(?job, "Created variable without a name"),
            },
            None => debug!(payload = %r.payload, "Variable created without a pending request"),
        }
        if let Some(next) = settled.next {
            self.start_create(next);
        }
    }
}
