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

//! Plain-text rendering of session state for the terminal.

use midb_session::{
    source::{parse_address, SourceCache},
    varobj::Scope,
    ConsoleEntryKind, ConsoleEvent, SessionState, SourceCodeState, VarObj, VarObjTree,
};

/// Lines shown above and below the current line when the program pauses
pub const EXCERPT_CONTEXT: u32 = 5;

/// One console entry as a terminal line
pub fn console_line(event: &ConsoleEvent) -> String {
    match event.kind {
        ConsoleEntryKind::SentCommand => format!("> {}", event.text),
        ConsoleEntryKind::StdOut | ConsoleEntryKind::StdErr => event.text.clone(),
        ConsoleEntryKind::ToolOutput => format!("[midb] {}", event.text),
        ConsoleEntryKind::BacktraceLink => format!("[midb] {} -> :backtrace", event.text),
    }
}

/// Whether an entry belongs on stderr
pub fn is_error(event: &ConsoleEvent) -> bool {
    event.kind == ConsoleEntryKind::StdErr
}

/// Every variable object, indented by depth. Collapsed nodes hide their children.
pub fn variable_tree(tree: &VarObjTree) -> Vec<String> {
    if tree.is_empty() {
        return vec!["(no variables)".to_string()];
    }
    let mut out = Vec::new();
    for root in tree.roots() {
        push_node(root, 0, &mut out);
    }
    out
}

fn push_node(node: &VarObj, depth: usize, out: &mut Vec<String>) {
    let label = node.expression.as_deref().or(node.exp.as_deref()).unwrap_or(&node.name);
    let marker = match (node.numchild > 0, node.show_children_in_ui) {
        (false, _) => " ",
        (true, true) => "-",
        (true, false) => "+",
    };
    let value = node.display_value.as_deref().unwrap_or(&node.value);
    let mut line = format!("{}{marker} {label} = {value}", "  ".repeat(depth));
    if !node.var_type.is_empty() {
        line.push_str(&format!("  ({})", node.var_type));
    }
    line.push_str(&format!("  [{}]", node.name));
    if node.in_scope == Scope::False {
        line.push_str("  <out of scope>");
    }
    if node.show_plot && node.values.len() > 1 {
        let history: Vec<String> = node.values.iter().map(f64::to_string).collect();
        line.push_str(&format!("  plot: {}", history.join(" ")));
    }
    out.push(line);

    if node.show_children_in_ui {
        for child in &node.children {
            push_node(child, depth + 1, out);
        }
    }
}

/// Short summary of where the program is and what is being shown
pub fn state_summary(state: &SessionState) -> Vec<String> {
    let mut out = vec![format!(
        "program: {:?}, connection: {:?}{}",
        state.run_state,
        state.connection,
        if state.waiting_for_response { ", waiting for gdb" } else { "" }
    )];
    if let Some(version) = &state.gdb_version {
        out.push(format!("gdb {version}"));
    }
    if let Some(binary) = &state.inferior_binary {
        out.push(format!("binary: {binary}"));
    }
    if let Some(frame) = &state.paused_on_frame {
        out.push(format!(
            "frame #{}: {} at {}:{}",
            state.selected_frame_num,
            frame.func.as_deref().unwrap_or("??"),
            frame.file.as_deref().unwrap_or("??"),
            frame.line.as_deref().unwrap_or("?")
        ));
    }
    if let Some(thread) = &state.current_thread_id {
        out.push(format!("thread {thread} of {}", state.threads.len()));
    }
    for bkpt in &state.breakpoints {
        out.push(format!(
            "breakpoint {}: {}:{}",
            bkpt.number,
            bkpt.fullname.as_deref().or(bkpt.func.as_deref()).unwrap_or("??"),
            bkpt.line.as_deref().unwrap_or("?")
        ));
    }
    let registers: Vec<String> = state
        .named_registers()
        .filter_map(|(name, value)| Some(format!("{name}={}", value?)))
        .collect();
    if !registers.is_empty() {
        out.push(format!("registers: {}", registers.join(" ")));
    }
    if !state.locals.is_empty() {
        let locals: Vec<String> = state
            .locals
            .iter()
            .map(|l| format!("{}={}", l.name, l.value.as_deref().unwrap_or("...")))
            .collect();
        out.push(format!("locals: {}", locals.join(", ")));
    }
    if !state.memory_cache.is_empty() {
        let bytes: Vec<&str> = state.memory_cache.values().map(String::as_str).collect();
        let start = state.memory_cache.keys().next().copied().unwrap_or_default();
        out.push(format!("memory {start:#x}: {}", bytes.join(" ")));
    }
    out.push(format!("source view: {:?}", state.source_code_state));
    if let Some(status) = &state.status {
        out.push(format!("status: {}{}", if status.error { "error: " } else { "" }, status.text));
    }
    if !state.autocomplete_options.is_empty() {
        out.push(format!("completions: {}", state.autocomplete_options.join(", ")));
    }
    out
}

/// Source or disassembly around the highlighted line, if anything is cached
pub fn excerpt(state: &SessionState, sources: &SourceCache, context: u32) -> Vec<String> {
    let line = state.line_of_source_to_flash.unwrap_or(1);
    match state.source_code_state {
        SourceCodeState::SourceCached | SourceCodeState::SourceAndAssemblyCached => {
            let Some(file) = state.fullname_to_render.as_deref().and_then(|f| sources.file(f)) else {
                return Vec::new();
            };
            let mut out = vec![format!("{}:", file.fullname)];
            let first = line.saturating_sub(context).max(1);
            for (number, text) in file.lines.range(first..=line.saturating_add(context)) {
                let marker = if *number == line { "=>" } else { "  " };
                let stop = if state.breakpoints.iter().any(|b| {
                    b.fullname.as_deref() == Some(file.fullname.as_str()) && b.line_number() == Some(*number)
                }) {
                    "*"
                } else {
                    " "
                };
                out.push(format!("{marker}{stop}{number:>5} {text}"));
            }
            out
        }
        SourceCodeState::AssemblyCached => {
            let Some(addr) = state.current_assembly_address.as_deref().and_then(parse_address) else {
                return Vec::new();
            };
            sources
                .raw_instructions_for(addr)
                .into_iter()
                .flatten()
                .take((context * 2 + 1) as usize)
                .map(|insn| {
                    let marker = if insn.addr() == Some(addr) { "=>" } else { "  " };
                    format!(
                        "{marker} {} <{}+{}> {}",
                        insn.address,
                        insn.func_name.as_deref().unwrap_or("??"),
                        insn.offset.as_deref().unwrap_or("0"),
                        insn.inst.as_deref().unwrap_or_default()
                    )
                })
                .collect()
        }
        SourceCodeState::FileMissing => vec![format!(
            "Source file {} is not available.",
            state.fullname_to_render.as_deref().unwrap_or("??")
        )],
        SourceCodeState::AssemblyUnavailable => {
            vec!["No source file and no disassembly for this location.".to_string()]
        }
        SourceCodeState::FetchingSource
        | SourceCodeState::FetchingAssembly
        | SourceCodeState::NoneAvailable => Vec::new(),
    }
}
