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

//! Observable session state and the snapshot published to renderers.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dispatcher::ConnectionState,
    record::str_field,
    selection::{LineWindow, SelectionMode, SourceCodeState},
    source::parse_address,
    varobj::VarObj,
};

/// Lifecycle of the debugged program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started yet
    #[default]
    NotStarted,
    /// Executing
    Running,
    /// Stopped at a frame
    Paused,
    /// Terminated
    Exited,
}

/// One stack frame as reported in `*stopped` and `-stack-list-frames`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    /// Depth, 0 being the innermost
    pub level: Option<String>,
    /// Program counter
    pub addr: Option<String>,
    /// Function name
    pub func: Option<String>,
    /// File name as compiled
    pub file: Option<String>,
    /// Absolute path of the file
    pub fullname: Option<String>,
    /// Line, as transmitted
    pub line: Option<String>,
    /// Shared library the frame is in, when there is no source
    pub from: Option<String>,
}

impl Frame {
    /// Parse a frame tuple
    pub fn from_mi(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Line as a number
    pub fn line_number(&self) -> Option<u32> {
        self.line.as_deref()?.trim().parse().ok()
    }

    /// Program counter as a number
    pub fn address(&self) -> Option<u64> {
        parse_address(self.addr.as_deref()?)
    }
}

/// A breakpoint from `bkpt` or the breakpoint table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Breakpoint {
    /// Breakpoint number
    pub number: String,
    /// `breakpoint`, `watchpoint`, ...
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// `y` or `n`
    pub enabled: Option<String>,
    /// Resolved address
    pub addr: Option<String>,
    /// Function
    pub func: Option<String>,
    /// File name as compiled
    pub file: Option<String>,
    /// Absolute path of the file
    pub fullname: Option<String>,
    /// Line, as transmitted
    pub line: Option<String>,
    /// Hit count
    pub times: Option<String>,
    /// Location as the user typed it
    #[serde(rename = "original-location")]
    pub original_location: Option<String>,
}

impl Breakpoint {
    /// Parse a `bkpt` tuple
    pub fn from_mi(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Line as a number
    pub fn line_number(&self) -> Option<u32> {
        self.line.as_deref()?.trim().parse().ok()
    }

    /// Whether both breakpoints stop at the same place
    pub fn same_location(&self, other: &Self) -> bool {
        self.fullname == other.fullname && self.func == other.func && self.line == other.line
    }
}

/// A thread from `-thread-info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    /// Debugger thread id
    pub id: String,
    /// System thread description
    #[serde(rename = "target-id")]
    pub target_id: Option<String>,
    /// Thread name
    pub name: Option<String>,
    /// `stopped` or `running`
    pub state: Option<String>,
    /// Core the thread last ran on
    pub core: Option<String>,
    /// Innermost frame
    pub frame: Option<Frame>,
}

/// A local of the selected frame, from `-stack-list-variables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalVariable {
    /// Variable name
    pub name: String,
    /// Type, when printed
    #[serde(rename = "type")]
    pub var_type: Option<String>,
    /// Value, printed only for simple types
    pub value: Option<String>,
    /// Whether a variable object should be created to explore it
    pub can_be_expanded: bool,
}

impl LocalVariable {
    /// Parse one entry of the `variables` list
    pub fn from_mi(value: &Value) -> Option<Self> {
        let name = str_field(value, "name")?.to_string();
        let var_type = str_field(value, "type").map(str::to_string);
        let local_value = str_field(value, "value").map(str::to_string);
        // Only scalars get a value printed; pointers among them can still be followed
        let can_be_expanded = match &local_value {
            None => true,
            Some(_) => var_type.as_deref().is_some_and(|t| t.contains('*')),
        };
        Some(Self { name, var_type, value: local_value, can_be_expanded })
    }
}

/// Source language of the loaded program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// C, C++ and everything else
    #[default]
    CFamily,
    /// Rust
    Rust,
    /// Go
    Go,
}

impl Language {
    /// Detect the language from the source file list
    pub fn detect<'a>(paths: impl IntoIterator<Item = &'a str> + Clone) -> Self {
        if paths.clone().into_iter().any(|p| p.ends_with(".rs")) {
            Self::Rust
        } else if paths.into_iter().any(|p| p.ends_with(".go")) {
            Self::Go
        } else {
            Self::CFamily
        }
    }
}

/// Text of the status line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    /// Rendered text
    pub text: String,
    /// Whether it reports a failure
    pub error: bool,
}

/// Everything the session knows about the debugger and the program
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Program lifecycle
    pub run_state: RunState,
    /// Transport state
    pub connection: ConnectionState,
    /// A command was sent and no response has arrived yet
    pub waiting_for_response: bool,
    /// Who picked the location in the source view
    pub selection_mode: SelectionMode,
    /// File shown in the source view
    pub fullname_to_render: Option<String>,
    /// Line to highlight
    pub line_of_source_to_flash: Option<u32>,
    /// Program counter of the paused frame
    pub current_assembly_address: Option<String>,
    /// Frame the program is paused in
    pub paused_on_frame: Option<Frame>,
    /// Frame selected in the stack
    pub selected_frame_num: usize,
    /// Selected thread
    pub current_thread_id: Option<String>,
    /// Call stack of the selected thread
    pub stack: Vec<Frame>,
    /// All threads
    pub threads: Vec<Thread>,
    /// Register names, indexed by register number; gaps are empty strings
    pub register_names: Vec<String>,
    /// Register values by number, as of the previous pause
    pub previous_register_values: BTreeMap<String, String>,
    /// Register values by number
    pub current_register_values: BTreeMap<String, String>,
    /// Registers can be fetched for this program
    pub can_fetch_register_values: bool,
    /// Breakpoints
    pub breakpoints: Vec<Breakpoint>,
    /// Start of the memory view, as typed
    pub memory_start: Option<String>,
    /// End of the memory view, as typed
    pub memory_end: Option<String>,
    /// Fetched memory, hex contents by start address
    pub memory_cache: BTreeMap<u64, String>,
    /// Locals of the selected frame
    pub locals: Vec<LocalVariable>,
    /// Source files of the loaded program, sorted
    pub source_file_paths: Vec<String>,
    /// Language of the loaded program
    pub language: Language,
    /// Debugger version string, e.g. `12.1`
    pub gdb_version: Option<String>,
    /// Numeric parts of the debugger version
    pub gdb_version_parts: Vec<u32>,
    /// Process id of the inferior
    pub inferior_pid: Option<String>,
    /// Program loaded in the debugger
    pub inferior_binary: Option<String>,
    /// Modification time of the loaded program
    #[serde(skip)]
    pub inferior_binary_modified: Option<DateTime<Local>>,
    /// State of the source view
    pub source_code_state: SourceCodeState,
    /// Lines the source view displays
    pub source_window: Option<LineWindow>,
    /// Last status message
    pub status: Option<StatusLine>,
    /// Completions of the last `complete` command
    pub autocomplete_options: Vec<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            run_state: RunState::default(),
            connection: ConnectionState::default(),
            waiting_for_response: false,
            selection_mode: SelectionMode::default(),
            fullname_to_render: None,
            line_of_source_to_flash: None,
            current_assembly_address: None,
            paused_on_frame: None,
            selected_frame_num: 0,
            current_thread_id: None,
            stack: Vec::new(),
            threads: Vec::new(),
            register_names: Vec::new(),
            previous_register_values: BTreeMap::new(),
            current_register_values: BTreeMap::new(),
            can_fetch_register_values: true,
            breakpoints: Vec::new(),
            memory_start: None,
            memory_end: None,
            memory_cache: BTreeMap::new(),
            locals: Vec::new(),
            source_file_paths: Vec::new(),
            language: Language::default(),
            gdb_version: None,
            gdb_version_parts: Vec::new(),
            inferior_pid: None,
            inferior_binary: None,
            inferior_binary_modified: None,
            source_code_state: SourceCodeState::default(),
            source_window: None,
            status: None,
            autocomplete_options: Vec::new(),
        }
    }
}

impl SessionState {
    /// Disassembly mode accepted by the running debugger. Versions up to
    /// 7.7 only know modes 0 to 3.
    pub fn disassembly_mode(&self) -> u8 {
        match self.gdb_version_parts.as_slice() {
            [] => 4,
            [major, ..] if *major < 7 => 3,
            [7, minor, ..] if *minor <= 7 => 3,
            [7] => 3,
            _ => 4,
        }
    }

    /// Register names paired with their current value, skipping unnamed slots
    pub fn named_registers(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.register_names.iter().enumerate().filter(|(_, name)| !name.is_empty()).map(|(i, name)| {
            (name.as_str(), self.current_register_values.get(&i.to_string()).map(String::as_str))
        })
    }
}

/// Read-only view handed to renderers
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Session state
    pub state: SessionState,
    /// Variable object roots
    pub variables: Vec<VarObj>,
}
