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

//! Console event stream and the raw record audit ring.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::trace;

use crate::record::ProtocolRecord;

/// Lines the debugger prints when state refresh commands run without a live
/// inferior; never worth showing.
const IGNORED_ENTRIES: &[&str] = &["No registers."];

/// Origin of a console entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleEntryKind {
    /// A command we sent, echoed when enabled
    SentCommand,
    /// Regular debugger or program output
    StdOut,
    /// Error output
    StdErr,
    /// Messages produced by the frontend itself
    ToolOutput,
    /// Affordance to re-enter a faulted program with a backtrace
    BacktraceLink,
}

/// One entry of the console stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleEvent {
    /// Where the entry came from
    pub kind: ConsoleEntryKind,
    /// Text of the entry
    pub text: String,
}

impl ConsoleEvent {
    /// Build an entry
    pub fn new(kind: ConsoleEntryKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }
}

/// Bounded console history plus the entries not yet handed to the renderer.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    history: VecDeque<ConsoleEvent>,
    undrained: Vec<ConsoleEvent>,
    capacity: usize,
}

impl ConsoleLog {
    /// Create a log keeping at most `capacity` entries of history
    pub fn new(capacity: usize) -> Self {
        Self { history: VecDeque::new(), undrained: Vec::new(), capacity: capacity.max(1) }
    }

    /// Append one entry
    pub fn push(&mut self, kind: ConsoleEntryKind, text: impl Into<String>) {
        let text = text.into();
        if IGNORED_ENTRIES.contains(&text.trim_end()) {
            return;
        }
        trace!(?kind, %text, "Console entry");

        let event = ConsoleEvent::new(kind, text);
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        self.undrained.push(event);
    }

    /// Append several entries of the same kind
    pub fn extend<I, S>(&mut self, kind: ConsoleEntryKind, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in entries {
            self.push(kind, entry);
        }
    }

    /// Entries appended since the last drain
    pub fn drain(&mut self) -> Vec<ConsoleEvent> {
        std::mem::take(&mut self.undrained)
    }

    /// Retained history, oldest first
    pub fn history(&self) -> impl Iterator<Item = &ConsoleEvent> {
        self.history.iter()
    }

    /// Forget all entries
    pub fn clear(&mut self) {
        self.history.clear();
        self.undrained.clear();
    }
}

/// Capped ring of serialized records, kept for diagnosing failures.
#[derive(Debug, Clone)]
pub struct AuditLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl AuditLog {
    /// Create a ring keeping at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self { lines: VecDeque::new(), capacity: capacity.max(1) }
    }

    /// Record one raw protocol record
    pub fn record(&mut self, record: &ProtocolRecord) {
        let line = serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"));
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Recorded lines, oldest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
