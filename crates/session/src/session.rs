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

//! The session: owned state plus every operation a frontend can invoke.
//!
//! All methods run on one logical thread. Responses are fed in through
//! [`Session::handle`], file reads through [`Session::on_source_read`] and
//! timer ticks through [`Session::check_watchdog`]; nothing here blocks.

use std::{collections::HashSet, time::Instant};

use chrono::{DateTime, Local};
use eyre::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::{
    config::SessionConfig,
    console::{AuditLog, ConsoleEntryKind, ConsoleEvent, ConsoleLog},
    dispatcher::{CommandBatch, ConnectionState, Dispatcher, Outbound, SendOutcome},
    queue::{ChildrenJob, CreateJob, FetchQueue},
    selection::{decide, FetchAction, SelectionInputs, SelectionMode},
    source::{SourceCache, SourceJob, SourceWindow},
    state::{Frame, Language, RunState, SessionSnapshot, SessionState},
    token::SentinelToken,
    varobj::{ExprType, VarObj, VarObjTree},
};

/// Most bytes the memory view reads in one go
pub const MAX_MEMORY_BYTES: u64 = 1000;

/// Bytes shown when only a start address is given
const DEFAULT_MEMORY_BYTES: u64 = 31;

const WATCHDOG_HELP: [&str; 4] = [
    "Possible reasons include:",
    "1) midb, gdb, or the debugged process is not running.",
    "2) gdb or the inferior process is busy running and needs to be interrupted (use :interrupt).",
    "3) Something is just taking a long time to finish and respond, in which case you can just keep waiting.",
];

/// A gdb session seen from the client side
#[derive(Debug)]
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) state: SessionState,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) create_queue: FetchQueue<CreateJob>,
    pub(crate) children_queue: FetchQueue<ChildrenJob>,
    pub(crate) source_queue: FetchQueue<SourceJob>,
    pub(crate) vars: VarObjTree,
    pub(crate) sources: SourceCache,
    pub(crate) console: ConsoleLog,
    pub(crate) audit: AuditLog,
    warned_stale_sources: HashSet<String>,
    dirty: bool,
}

impl Session {
    /// Create a session writing its requests to `outbound`
    pub fn new(config: SessionConfig, outbound: UnboundedSender<Outbound>) -> Self {
        let dispatcher = Dispatcher::new(outbound, config.watchdog_timeout());
        Self {
            state: SessionState::default(),
            dispatcher,
            create_queue: FetchQueue::new("create"),
            children_queue: FetchQueue::new("children"),
            source_queue: FetchQueue::new("source"),
            vars: VarObjTree::new(),
            sources: SourceCache::new(),
            console: ConsoleLog::new(config.console_capacity),
            audit: AuditLog::new(config.audit_capacity),
            warned_stale_sources: HashSet::new(),
            dirty: true,
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Variable objects
    pub fn variables(&self) -> &VarObjTree {
        &self.vars
    }

    /// Cached source and assembly
    pub fn sources(&self) -> &SourceCache {
        &self.sources
    }

    /// Raw records received so far
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Configuration in effect
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// When the driver should call [`Session::check_watchdog`] next
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.dispatcher.watchdog().deadline()
    }

    /// Console entries produced since the last call
    pub fn drain_console(&mut self) -> Vec<ConsoleEvent> {
        self.console.drain()
    }

    /// A snapshot if anything changed since the last one
    pub fn take_snapshot(&mut self) -> Option<SessionSnapshot> {
        if !std::mem::take(&mut self.dirty) {
            return None;
        }
        Some(SessionSnapshot { state: self.state.clone(), variables: self.vars.roots().to_vec() })
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn print(&mut self, kind: ConsoleEntryKind, text: impl Into<String>) {
        self.console.push(kind, text);
        self.mark_dirty();
    }

    // ---- transport ------------------------------------------------------

    /// Send commands to gdb
    pub fn send(&mut self, commands: impl Into<CommandBatch>) -> SendOutcome {
        let batch = commands.into();
        if batch.is_empty() {
            return SendOutcome::Ignored;
        }
        if self.config.show_all_sent_commands_in_console {
            self.console.extend(ConsoleEntryKind::SentCommand, batch.commands().iter().cloned());
        }
        self.state.waiting_for_response = true;
        self.mark_dirty();
        self.dispatcher.send(batch)
    }

    /// The transport connected; buffered commands go out
    pub fn on_connect(&mut self) {
        self.state.connection = ConnectionState::Connected;
        let flushed = self.dispatcher.on_connect();
        debug!(flushed, "Flushed buffered commands");
        self.mark_dirty();
    }

    /// The transport closed; the session is over
    pub fn on_disconnect(&mut self) {
        self.dispatcher.on_disconnect();
        self.state.connection = ConnectionState::Disconnected;
        self.state.waiting_for_response = false;
        self.print(ConsoleEntryKind::StdErr, "Connection to gdb closed. Restart midb to start a new session.");
    }

    /// Fire the no-response watchdog if its deadline has passed
    pub fn check_watchdog(&mut self, now: Instant) -> bool {
        if !self.dispatcher.poll_watchdog(now) {
            return false;
        }
        info!("No response from gdb before the watchdog deadline");
        self.clear_program_state();
        self.state.waiting_for_response = false;
        self.mark_dirty();
        if !self.dispatcher.is_connected() {
            return true;
        }
        let secs = self.config.watchdog_timeout_secs;
        self.console.push(ConsoleEntryKind::ToolOutput, format!("No gdb response received after {secs} seconds."));
        self.console.extend(ConsoleEntryKind::ToolOutput, WATCHDOG_HELP);
        true
    }

    /// A file read requested through [`Outbound::ReadSource`] finished
    pub fn on_source_read(&mut self, job: SourceJob, result: Result<SourceWindow>) {
        let settled = self.source_queue.settle();
        if settled.finished.as_ref() != Some(&job) {
            debug!(?job, "Source read completed out of order");
        }
        match result {
            Ok(window) => {
                self.warn_if_source_newer_than_binary(&window);
                self.sources.save_source(window);
            }
            Err(e) => {
                self.print(ConsoleEntryKind::StdErr, format!("{e}"));
                self.sources.mark_missing(&job.fullname);
            }
        }
        if let Some(next) = settled.next {
            self.dispatcher.request(Outbound::ReadSource(next));
        }
        self.render_source();
    }

    // ---- console --------------------------------------------------------

    /// Run a command the user typed, refreshing state afterwards if configured
    pub fn run_console_command(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        if !self.config.show_all_sent_commands_in_console {
            self.print(ConsoleEntryKind::SentCommand, command);
        }
        if self.config.refresh_state_after_console_command {
            let mut commands = vec![command.to_string()];
            commands.extend(self.refresh_commands());
            self.send(commands);
        } else {
            self.send(command);
        }
    }

    /// Ask gdb for completions of a partial command
    pub fn autocomplete(&mut self, partial: &str) {
        self.send(format!("complete {partial}"));
    }

    /// Commands sent once when the session starts
    pub fn run_initial_commands(&mut self, user_command: Option<&str>) {
        let mut commands = vec!["set breakpoint pending on".to_string()];
        commands.extend(user_command.map(str::to_string));
        self.send(commands);
    }

    // ---- program control ------------------------------------------------

    /// Load a program, optionally stopping at `main`
    pub fn load_binary(&mut self, binary: &str, args: &str) {
        self.state.source_file_paths.clear();
        self.state.language = Language::default();
        self.inferior_program_exited();
        self.state.inferior_binary = Some(binary.to_string());
        let mut commands =
            vec![format!("-exec-arguments {args}"), format!("-file-exec-and-symbols {binary}")];
        if self.config.auto_add_breakpoint_to_main {
            commands.push("-break-insert main".to_string());
        }
        commands.push("-break-list".to_string());
        self.send(commands);
    }

    /// Record the program gdb debugs, for the stale source warning
    pub fn set_inferior_binary(&mut self, path: &str, modified: Option<DateTime<Local>>) {
        self.state.inferior_binary = Some(path.to_string());
        self.state.inferior_binary_modified = modified;
        self.mark_dirty();
    }

    /// Start the program from the beginning
    pub fn run(&mut self) {
        self.state.run_state = RunState::Running;
        self.clear_program_state();
        self.send("-exec-run");
    }

    /// Resume execution
    pub fn continue_(&mut self) {
        self.resume("-exec-continue");
    }

    /// Step over one source line
    pub fn next(&mut self) {
        self.resume("-exec-next");
    }

    /// Step into one source line
    pub fn step(&mut self) {
        self.resume("-exec-step");
    }

    /// Step over one instruction
    pub fn next_instruction(&mut self) {
        self.resume("-exec-next-instruction");
    }

    /// Step into one instruction
    pub fn step_instruction(&mut self) {
        self.resume("-exec-step-instruction");
    }

    /// Interrupt the running program
    pub fn interrupt(&mut self) {
        self.send("-exec-interrupt");
    }

    fn resume(&mut self, command: &str) {
        self.state.run_state = RunState::Running;
        self.mark_dirty();
        self.send(command);
    }

    /// Re-enter a faulted program through its backtrace
    pub fn backtrace(&mut self) {
        self.state.run_state = RunState::Paused;
        let mut commands = vec!["backtrace".to_string()];
        commands.extend(self.refresh_commands());
        self.send(commands);
    }

    /// Switch to another frame of the stack
    pub fn select_frame(&mut self, frame: usize) {
        self.state.selected_frame_num = frame;
        let mut commands = vec![format!("-stack-select-frame {frame}")];
        commands.extend(self.refresh_commands());
        self.send(commands);
    }

    /// Switch to another thread
    pub fn select_thread(&mut self, id: &str) {
        self.state.current_thread_id = Some(id.to_string());
        let mut commands = vec![format!("-thread-select {id}")];
        commands.extend(self.refresh_commands());
        self.send(commands);
    }

    /// Set a breakpoint at a source line
    pub fn insert_breakpoint(&mut self, fullname: &str, line: u32) {
        self.send(format!("-break-insert \"{fullname}:{line}\""));
    }

    /// Delete a breakpoint by number
    pub fn delete_breakpoint(&mut self, number: &str) {
        self.send(vec![format!("-break-delete {number}"), "-break-list".to_string()]);
    }

    /// Re-read the list of source files of the program
    pub fn fetch_source_files(&mut self) {
        self.state.source_file_paths.clear();
        self.send("-file-list-exec-source-files");
    }

    /// Refresh everything shown while paused
    pub fn refresh_state_for_pause(&mut self) {
        let commands = self.refresh_commands();
        self.send(commands);
    }

    /// Fetch values of every variable object, node by node
    pub fn update_variables(&mut self) {
        let commands = self.vars.update_commands();
        self.send(commands);
    }

    pub(crate) fn refresh_commands(&mut self) -> Vec<String> {
        let ignore = SentinelToken::IgnoreErrors;
        let mut commands = vec![
            ignore.tag("-thread-info"),
            ignore.tag("-stack-list-variables --simple-values"),
            ignore.tag("-var-update --all-values *"),
        ];
        if self.state.can_fetch_register_values {
            if self.state.register_names.is_empty() {
                commands.push(ignore.tag("-data-list-register-names"));
            }
            commands.push(ignore.tag("-data-list-register-values x"));
        }
        commands.extend(self.memory_commands());
        commands.push("-break-list".to_string());
        commands.push(ignore.tag("-stack-list-frames"));
        commands
    }

    // ---- memory ---------------------------------------------------------

    /// Choose the memory range to show and read it
    pub fn set_memory_range(&mut self, start: &str, end: Option<&str>) {
        self.state.memory_start = Some(start.trim().to_string()).filter(|s| !s.is_empty());
        self.state.memory_end = end.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
        self.state.memory_cache.clear();
        let commands = self.memory_commands();
        self.send(commands);
    }

    fn memory_commands(&mut self) -> Vec<String> {
        let Some(start) = self.state.memory_start.as_deref().and_then(parse_hex) else {
            return Vec::new();
        };
        let mut end = match self.state.memory_end.as_deref().and_then(parse_hex) {
            Some(end) if end >= start => end,
            _ => start.saturating_add(DEFAULT_MEMORY_BYTES),
        };
        if end - start > MAX_MEMORY_BYTES {
            end = start.saturating_add(MAX_MEMORY_BYTES);
            self.print(
                ConsoleEntryKind::StdErr,
                format!("Cannot fetch more than {MAX_MEMORY_BYTES} bytes when changing the memory view. Only fetching up to {end:#x}."),
            );
        }
        self.state.memory_end = Some(format!("{end:#x}"));
        (start..=end)
            .map(|addr| SentinelToken::IgnoreErrors.tag(format!("-data-read-memory-bytes {addr:#x} 1")))
            .collect()
    }

    // ---- variables ------------------------------------------------------

    /// Create a variable object for an expression
    pub fn create_variable(&mut self, expression: &str, expr_type: ExprType) {
        let expression = expression.trim();
        if expression.is_empty() {
            return;
        }
        let job = CreateJob { expression: expression.to_string(), expr_type };
        if let Some(job) = self.create_queue.enqueue(job) {
            self.start_create(job);
        }
    }

    pub(crate) fn start_create(&mut self, job: CreateJob) {
        let quoted = if job.expression.starts_with('"') {
            job.expression.clone()
        } else {
            format!("\"{}\"", job.expression)
        };
        let mut commands = Vec::with_capacity(2);
        if self.config.pretty_print {
            commands.push("-enable-pretty-printing".to_string());
        }
        commands.push(SentinelToken::CreateVar.tag(format!("-var-create - * {quoted}")));
        self.send(commands);
    }

    /// Show the children of a variable, fetching them on first use
    pub fn expand(&mut self, name: &str) {
        let Some(node) = self.vars.find_mut(name) else {
            debug!(%name, "Cannot expand unknown variable");
            return;
        };
        node.show_children_in_ui = true;
        let job = node
            .needs_children()
            .then(|| ChildrenJob { parent: node.name.clone(), expr_type: node.expr_type });
        self.mark_dirty();
        if let Some(job) = job {
            self.enqueue_children(job);
        }
    }

    /// Hide the children of a variable. Fetched children stay cached.
    pub fn collapse(&mut self, name: &str) {
        if let Some(node) = self.vars.find_mut(name) {
            node.show_children_in_ui = false;
            self.mark_dirty();
        }
    }

    /// Expand a collapsed variable, or collapse an expanded one
    pub fn toggle_children(&mut self, name: &str) {
        match self.vars.find(name).map(|n| n.show_children_in_ui) {
            Some(true) => self.collapse(name),
            Some(false) => self.expand(name),
            None => debug!(%name, "Cannot toggle unknown variable"),
        }
    }

    /// Explore a local: toggle its variable if one exists, create it otherwise
    pub fn expand_local(&mut self, expression: &str) {
        let existing = self.vars.find_root_by_expression(expression, ExprType::Local).map(|r| r.name.clone());
        match existing {
            Some(name) => self.toggle_children(&name),
            None => self.create_variable(expression, ExprType::Local),
        }
    }

    pub(crate) fn enqueue_children(&mut self, job: ChildrenJob) {
        if let Some(job) = self.children_queue.enqueue(job) {
            self.start_children(job);
        }
    }

    pub(crate) fn start_children(&mut self, job: ChildrenJob) {
        self.send(SentinelToken::ListChildren.tag(format!("-var-list-children --all-values \"{}\"", job.parent)));
    }

    /// Delete a variable object here and in gdb. Unknown names are ignored.
    pub fn delete_variable(&mut self, name: &str) {
        if self.vars.remove(name).is_none() {
            debug!(%name, "Variable already gone");
            return;
        }
        self.mark_dirty();
        self.send(format!("-var-delete {name}"));
    }

    /// Show an integer variable in the next base
    pub fn cycle_radix(&mut self, name: &str) -> Option<u32> {
        let radix = self.vars.cycle_radix(name);
        if radix.is_some() {
            self.mark_dirty();
        }
        radix
    }

    /// Show or hide the plot of a watched variable
    pub fn toggle_plot(&mut self, name: &str) -> Option<bool> {
        let shown = self.vars.toggle_plot(name);
        self.mark_dirty();
        shown
    }

    /// Source expression of a variable, for copying into a watch
    pub fn full_expression_path(&self, name: &str) -> Option<String> {
        self.vars.full_expression_path(name)
    }

    pub(crate) fn insert_created_root(&mut self, job: &CreateJob, mut obj: VarObj) {
        obj.expression = Some(job.expression.clone());
        let name = obj.name.clone();
        self.vars.insert_root(obj);
        self.expand(&name);
    }

    // ---- source ---------------------------------------------------------

    /// Show a file at a line, chosen by the user
    pub fn view_file(&mut self, fullname: &str, line: u32) {
        self.state.selection_mode = SelectionMode::User;
        self.state.fullname_to_render = Some(fullname.to_string());
        self.state.line_of_source_to_flash = Some(line);
        self.state.current_assembly_address = None;
        self.render_source();
    }

    /// Move the highlighted line in the file currently shown
    pub fn set_line(&mut self, line: u32) {
        self.state.line_of_source_to_flash = Some(line);
        self.render_source();
    }

    /// Change the source window size and re-render
    pub fn set_max_lines_of_code_to_fetch(&mut self, lines: i64) {
        self.config.set_max_lines_of_code_to_fetch(lines);
        self.render_source();
    }

    /// Fetch the instructions of the source around the highlighted line
    pub fn show_assembly_for_current_line(&mut self) {
        let Some(fullname) = self.state.fullname_to_render.clone() else {
            self.render_source();
            return;
        };
        if !fullname.starts_with('/') {
            debug!(%fullname, "Not disassembling a relative path");
            return;
        }
        let line = self.state.line_of_source_to_flash.unwrap_or(1);
        let count = self.config.disassembly_instruction_count;
        let mode = self.state.disassembly_mode();
        self.send(SentinelToken::InlineDisassembly.tag(format!(
            "-data-disassemble -f {fullname} -l {line} -n {count} -- {mode}"
        )));
    }

    /// Forget all fetched disassembly, including addresses that failed
    pub fn clear_cached_assembly(&mut self) {
        self.sources.clear_cached_assembly();
        self.render_source();
    }

    /// Drop cached source so that edited files are read again
    pub fn refresh_cached_source_files(&mut self) {
        self.sources.refresh();
        self.warned_stale_sources.clear();
        self.render_source();
    }

    pub(crate) fn render_source(&mut self) {
        let paused_mode = self.state.selection_mode == SelectionMode::PausedFrame;
        let frame_fullname = self.state.paused_on_frame.as_ref().and_then(|f| f.fullname.as_deref());
        let inputs = SelectionInputs {
            running: self.state.run_state == RunState::Running,
            fullname: if paused_mode {
                frame_fullname
            } else {
                self.state.fullname_to_render.as_deref()
            },
            line: self.state.line_of_source_to_flash,
            addr: if paused_mode { self.state.current_assembly_address.as_deref() } else { None },
            paused: paused_mode && self.state.run_state == RunState::Paused,
        };
        let Some(decision) = decide(
            &self.sources,
            &inputs,
            self.config.max_lines_of_code_to_fetch,
            self.config.raw_disassembly_span,
        ) else {
            return;
        };

        if let Some(path) = &decision.mark_missing {
            self.sources.mark_missing(path);
        }
        debug!(state = ?decision.state, window = ?decision.window, "Source view");
        self.state.source_code_state = decision.state;
        self.state.source_window = Some(decision.window);
        self.mark_dirty();

        match decision.fetch {
            Some(FetchAction::Source(job)) => {
                self.sources.begin_fetch(&job.fullname);
                if let Some(job) = self.source_queue.enqueue(job) {
                    self.dispatcher.request(Outbound::ReadSource(job));
                }
            }
            Some(FetchAction::RawAssembly { start, end }) => {
                self.sources.begin_raw_fetch(start);
                self.send(SentinelToken::RawDisassembly.tag(format!(
                    "-data-disassemble -s {start:#x} -e {end:#x} -- 0"
                )));
            }
            None => {}
        }
    }

    fn warn_if_source_newer_than_binary(&mut self, window: &SourceWindow) {
        let (Some(source), Some(binary)) = (window.last_modified, self.state.inferior_binary_modified) else {
            return;
        };
        if source <= binary || !self.warned_stale_sources.insert(window.fullname.clone()) {
            return;
        }
        let format = "%Y-%m-%d %H:%M:%S";
        self.console.extend(
            ConsoleEntryKind::ToolOutput,
            [
                format!("Warning: {} was modified after the binary was built.", window.fullname),
                format!(
                    "The source ({}) is newer than the binary ({}); line numbers may not match.",
                    source.format(format),
                    binary.format(format)
                ),
            ],
        );
    }

    // ---- lifecycle ------------------------------------------------------

    pub(crate) fn program_paused(&mut self, frame: Option<Frame>) {
        self.state.run_state = RunState::Paused;
        self.state.selection_mode = SelectionMode::PausedFrame;
        if let Some(frame) = &frame {
            self.state.fullname_to_render = frame.fullname.clone();
            self.state.line_of_source_to_flash = frame.line_number();
            self.state.current_assembly_address = frame.addr.clone();
        }
        self.state.paused_on_frame = frame;
        self.mark_dirty();
        self.render_source();
        self.refresh_state_for_pause();
    }

    pub(crate) fn inferior_program_exited(&mut self) {
        info!("Inferior exited");
        self.state.run_state = RunState::Exited;
        self.sources.clear_raw_disassembly();
        self.state.register_names.clear();
        self.state.previous_register_values.clear();
        self.state.current_register_values.clear();
        self.state.inferior_pid = None;
        self.clear_program_state();
    }

    /// Forget everything that only makes sense while the program is alive
    pub(crate) fn clear_program_state(&mut self) {
        self.state.line_of_source_to_flash = None;
        self.state.paused_on_frame = None;
        self.state.current_assembly_address = None;
        self.state.selected_frame_num = 0;
        self.state.current_thread_id = None;
        self.state.stack.clear();
        self.state.threads.clear();
        self.state.memory_cache.clear();
        self.state.locals.clear();
        self.mark_dirty();
        for name in self.vars.root_names_of_type(ExprType::Local) {
            self.delete_variable(&name);
        }
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn connected() -> (Session, UnboundedReceiver<Outbound>) {
        let (tx, rx) = unbounded_channel();
        let mut session = Session::new(SessionConfig::default(), tx);
        session.on_connect();
        (session, rx)
    }

    fn sent(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut commands = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Commands(batch) = out {
                commands.extend(batch);
            }
        }
        commands
    }

    #[test]
    fn test_refresh_commands_are_ignore_tagged() {
        let (mut session, mut rx) = connected();
        session.refresh_state_for_pause();
        assert_eq!(
            sent(&mut rx),
            vec![
                "1-thread-info",
                "1-stack-list-variables --simple-values",
                "1-var-update --all-values *",
                "1-data-list-register-names",
                "1-data-list-register-values x",
                "-break-list",
                "1-stack-list-frames",
            ]
        );
    }

    #[test]
    fn test_memory_range_rules() {
        let (mut session, mut rx) = connected();
        session.set_memory_range("0x10", None);
        let commands = sent(&mut rx);
        assert_eq!(commands.len(), 32);
        assert_eq!(commands[0], "1-data-read-memory-bytes 0x10 1");
        assert_eq!(commands[31], "1-data-read-memory-bytes 0x2f 1");

        session.set_memory_range("0x100", Some("0x10"));
        assert_eq!(sent(&mut rx).len(), 32);

        session.drain_console();
        session.set_memory_range("0x0", Some("0x10000"));
        assert_eq!(sent(&mut rx).len(), (MAX_MEMORY_BYTES + 1) as usize);
        let console = session.drain_console();
        assert!(console.iter().any(|e| e.kind == ConsoleEntryKind::StdErr && e.text.contains("Cannot fetch more")));
    }

    #[test]
    fn test_memory_range_at_top_of_address_space() {
        let (mut session, mut rx) = connected();
        session.set_memory_range("0xffffffffffffffff", None);
        assert_eq!(sent(&mut rx), vec!["1-data-read-memory-bytes 0xffffffffffffffff 1"]);
        assert_eq!(session.state().memory_end.as_deref(), Some("0xffffffffffffffff"));

        session.set_memory_range("0xfffffffffffffff0", Some("0x10"));
        assert_eq!(sent(&mut rx).len(), 16);
    }

    #[test]
    fn test_create_variable_quotes_and_serializes() {
        let (mut session, mut rx) = connected();
        session.create_variable("x", ExprType::Watch);
        session.create_variable("\"y\"", ExprType::Watch);
        assert_eq!(sent(&mut rx), vec!["-enable-pretty-printing", "3-var-create - * \"x\""]);
        assert_eq!(session.create_queue.pending_len(), 1);
    }

    #[test]
    fn test_console_command_echo_and_refresh() {
        let (mut session, mut rx) = connected();
        session.run_console_command("info frame");
        let commands = sent(&mut rx);
        assert_eq!(commands[0], "info frame");
        assert!(commands.contains(&"1-thread-info".to_string()));
        let console = session.drain_console();
        assert_eq!(console, vec![ConsoleEvent::new(ConsoleEntryKind::SentCommand, "info frame")]);
    }

    #[test]
    fn test_load_binary_commands() {
        let (mut session, mut rx) = connected();
        session.load_binary("/tmp/a.out", "--verbose");
        assert_eq!(
            sent(&mut rx),
            vec!["-exec-arguments --verbose", "-file-exec-and-symbols /tmp/a.out", "-break-insert main", "-break-list"]
        );
    }

    #[test]
    fn test_view_file_requests_a_window() {
        let (mut session, mut rx) = connected();
        session.view_file("/src/main.c", 50);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::ReadSource(SourceJob { fullname: "/src/main.c".into(), start_line: 1, end_line: 501 })
        );
        assert_eq!(session.state().source_code_state, crate::selection::SourceCodeState::FetchingSource);
    }

    #[test]
    fn test_snapshot_only_when_dirty() {
        let (mut session, _rx) = connected();
        assert!(session.take_snapshot().is_some());
        assert!(session.take_snapshot().is_none());
        session.interrupt();
        assert!(session.take_snapshot().is_some());
    }

    #[test]
    fn test_delete_unknown_variable_is_a_no_op() {
        let (mut session, mut rx) = connected();
        session.delete_variable("var42");
        assert!(sent(&mut rx).is_empty());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x1f"), Some(31));
        assert_eq!(parse_hex("ff"), Some(255));
        assert_eq!(parse_hex("zz"), None);
    }
}
