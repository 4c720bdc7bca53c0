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

//! Commands typed at the midb prompt.
//!
//! Lines starting with `:` are frontend commands; anything else goes to gdb
//! as a console command.

use midb_session::{ExprType, Session};
use thiserror::Error;

/// Help text printed by `:help`
pub const HELP: &str = "\
:run | :continue | :next | :step | :nexti | :stepi | :interrupt
:backtrace                 re-enter a faulted program
:break FILE:LINE           insert a breakpoint
:delete N                  delete breakpoint N
:watch EXPR                watch an expression
:local EXPR                explore a local of the current frame
:expand NAME | :collapse NAME | :unwatch NAME
:radix NAME | :plot NAME | :path NAME
:view FILE[:LINE] | :line N | :lines N | :asm | :reload | :clear-asm
:memory START [END]        show memory
:frame N | :thread ID | :files | :update
:complete TEXT             ask gdb for completions
:tree | :state | :help | :quit
anything else is sent to gdb as typed";

/// A parsed prompt line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Send to gdb as typed
    Console(String),
    /// `:run`
    Run,
    /// `:continue`
    Continue,
    /// `:next`
    Next,
    /// `:step`
    Step,
    /// `:nexti`
    NextInstruction,
    /// `:stepi`
    StepInstruction,
    /// `:interrupt`
    Interrupt,
    /// `:backtrace`
    Backtrace,
    /// `:break FILE:LINE`
    Break { fullname: String, line: u32 },
    /// `:delete N`
    Delete(String),
    /// `:watch EXPR`
    Watch(String),
    /// `:local EXPR`
    Local(String),
    /// `:expand NAME`
    Expand(String),
    /// `:collapse NAME`
    Collapse(String),
    /// `:unwatch NAME`
    Unwatch(String),
    /// `:radix NAME`
    Radix(String),
    /// `:plot NAME`
    Plot(String),
    /// `:path NAME`
    Path(String),
    /// `:view FILE[:LINE]`
    View { fullname: String, line: u32 },
    /// `:line N`
    Line(u32),
    /// `:lines N`
    Lines(i64),
    /// `:asm`
    Assembly,
    /// `:reload`
    Reload,
    /// `:clear-asm`
    ClearAssembly,
    /// `:memory START [END]`
    Memory { start: String, end: Option<String> },
    /// `:frame N`
    Frame(usize),
    /// `:thread ID`
    Thread(String),
    /// `:files`
    Files,
    /// `:update`
    Update,
    /// `:complete TEXT`
    Complete(String),
    /// `:tree`
    Tree,
    /// `:state`
    State,
    /// `:help`
    Help,
    /// `:quit`
    Quit,
}

/// Why a prompt line could not be parsed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Not a known frontend command
    #[error("unknown command :{0}, try :help")]
    Unknown(String),
    /// The command needs an argument
    #[error(":{0} needs an argument")]
    MissingArgument(&'static str),
    /// An argument is not a number
    #[error("expected a number, got {0:?}")]
    NotANumber(String),
    /// A location is not `FILE:LINE`
    #[error("expected FILE:LINE, got {0:?}")]
    BadLocation(String),
}

/// Parse one prompt line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<UserCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Some(UserCommand::Console(line.to_string())));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "run" | "r" => UserCommand::Run,
        "continue" | "c" => UserCommand::Continue,
        "next" | "n" => UserCommand::Next,
        "step" | "s" => UserCommand::Step,
        "nexti" | "ni" => UserCommand::NextInstruction,
        "stepi" | "si" => UserCommand::StepInstruction,
        "interrupt" | "i" => UserCommand::Interrupt,
        "backtrace" | "bt" => UserCommand::Backtrace,
        "break" | "b" => {
            let (fullname, line) = location(required(arg, "break")?)?;
            UserCommand::Break { fullname, line: line.ok_or_else(|| CommandError::BadLocation(arg.to_string()))? }
        }
        "delete" | "d" => UserCommand::Delete(required(arg, "delete")?.to_string()),
        "watch" | "w" => UserCommand::Watch(required(arg, "watch")?.to_string()),
        "local" => UserCommand::Local(required(arg, "local")?.to_string()),
        "expand" => UserCommand::Expand(required(arg, "expand")?.to_string()),
        "collapse" => UserCommand::Collapse(required(arg, "collapse")?.to_string()),
        "unwatch" => UserCommand::Unwatch(required(arg, "unwatch")?.to_string()),
        "radix" => UserCommand::Radix(required(arg, "radix")?.to_string()),
        "plot" => UserCommand::Plot(required(arg, "plot")?.to_string()),
        "path" => UserCommand::Path(required(arg, "path")?.to_string()),
        "view" | "v" => {
            let (fullname, line) = location(required(arg, "view")?)?;
            UserCommand::View { fullname, line: line.unwrap_or(1) }
        }
        "line" => UserCommand::Line(number(required(arg, "line")?)?),
        "lines" => UserCommand::Lines(number(required(arg, "lines")?)?),
        "asm" => UserCommand::Assembly,
        "reload" => UserCommand::Reload,
        "clear-asm" => UserCommand::ClearAssembly,
        "memory" | "m" => {
            let mut parts = required(arg, "memory")?.split_whitespace();
            let start = parts.next().unwrap_or_default().to_string();
            UserCommand::Memory { start, end: parts.next().map(str::to_string) }
        }
        "frame" | "f" => UserCommand::Frame(number(required(arg, "frame")?)?),
        "thread" | "t" => UserCommand::Thread(required(arg, "thread")?.to_string()),
        "files" => UserCommand::Files,
        "update" => UserCommand::Update,
        "complete" => UserCommand::Complete(required(arg, "complete")?.to_string()),
        "tree" => UserCommand::Tree,
        "state" => UserCommand::State,
        "help" | "h" => UserCommand::Help,
        "quit" | "q" => UserCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required<'a>(arg: &'a str, command: &'static str) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(command))
    } else {
        Ok(arg)
    }
}

fn number<T: std::str::FromStr>(arg: &str) -> Result<T, CommandError> {
    arg.parse().map_err(|_| CommandError::NotANumber(arg.to_string()))
}

/// `FILE` or `FILE:LINE`
fn location(arg: &str) -> Result<(String, Option<u32>), CommandError> {
    match arg.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => {
            let line = line.parse().map_err(|_| CommandError::BadLocation(arg.to_string()))?;
            Ok((file.to_string(), Some(line)))
        }
        Some(_) => Err(CommandError::BadLocation(arg.to_string())),
        None => Ok((arg.to_string(), None)),
    }
}

/// What the driver should do after a command ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading commands
    Continue,
    /// Leave midb
    Quit,
}

/// Run a command against the session.
///
/// Commands that only display something write to the returned lines.
pub fn execute(session: &mut Session, command: UserCommand) -> (Flow, Vec<String>) {
    let mut out = Vec::new();
    match command {
        UserCommand::Console(line) => session.run_console_command(&line),
        UserCommand::Run => session.run(),
        UserCommand::Continue => session.continue_(),
        UserCommand::Next => session.next(),
        UserCommand::Step => session.step(),
        UserCommand::NextInstruction => session.next_instruction(),
        UserCommand::StepInstruction => session.step_instruction(),
        UserCommand::Interrupt => session.interrupt(),
        UserCommand::Backtrace => session.backtrace(),
        UserCommand::Break { fullname, line } => session.insert_breakpoint(&fullname, line),
        UserCommand::Delete(number) => session.delete_breakpoint(&number),
        UserCommand::Watch(expression) => session.create_variable(&expression, ExprType::Watch),
        UserCommand::Local(expression) => session.expand_local(&expression),
        UserCommand::Expand(name) => session.expand(&name),
        UserCommand::Collapse(name) => session.collapse(&name),
        UserCommand::Unwatch(name) => session.delete_variable(&name),
        UserCommand::Radix(name) => match session.cycle_radix(&name) {
            Some(radix) => out.push(format!("{name} now shown in base {radix}")),
            None => out.push(format!("{name} is not an integer variable")),
        },
        UserCommand::Plot(name) => match session.toggle_plot(&name) {
            Some(true) => out.push(format!("plotting {name}")),
            Some(false) => out.push(format!("stopped plotting {name}")),
            None => out.push(format!("no variable named {name}")),
        },
        UserCommand::Path(name) => match session.full_expression_path(&name) {
            Some(path) => out.push(path),
            None => out.push(format!("no variable named {name}")),
        },
        UserCommand::View { fullname, line } => session.view_file(&fullname, line),
        UserCommand::Line(line) => session.set_line(line),
        UserCommand::Lines(lines) => session.set_max_lines_of_code_to_fetch(lines),
        UserCommand::Assembly => session.show_assembly_for_current_line(),
        UserCommand::Reload => session.refresh_cached_source_files(),
        UserCommand::ClearAssembly => session.clear_cached_assembly(),
        UserCommand::Memory { start, end } => session.set_memory_range(&start, end.as_deref()),
        UserCommand::Frame(frame) => session.select_frame(frame),
        UserCommand::Thread(id) => session.select_thread(&id),
        UserCommand::Files => session.fetch_source_files(),
        UserCommand::Update => session.update_variables(),
        UserCommand::Complete(partial) => session.autocomplete(&partial),
        UserCommand::Tree => out.extend(crate::render::variable_tree(session.variables())),
        UserCommand::State => out.extend(crate::render::state_summary(session.state())),
        UserCommand::Help => out.extend(HELP.lines().map(str::to_string)),
        UserCommand::Quit => return (Flow::Quit, out),
    }
    (Flow::Continue, out)
}
