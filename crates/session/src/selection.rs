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

//! What the source view should show, and what has to be fetched for it.
//!
//! [`decide`] is a pure function of the cache and the current selection.
//! The session applies the returned [`Decision`]: it records the state,
//! marks paths missing and starts the fetch, if any.

use serde::Serialize;

use crate::source::{is_resolvable_path, parse_address, RawStatus, SourceCache, SourceJob};

/// Who picked the location shown in the source view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// The user opened a file or line
    #[default]
    User,
    /// The view follows the frame the program is paused in
    PausedFrame,
}

/// State of the source view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceCodeState {
    /// The line and its instructions are cached
    SourceAndAssemblyCached,
    /// The line is cached
    SourceCached,
    /// Lines around the selection are being read
    FetchingSource,
    /// No source, but instructions around the address are cached
    AssemblyCached,
    /// Instructions around the address are being fetched
    FetchingAssembly,
    /// Neither source nor instructions can be shown for the address
    AssemblyUnavailable,
    /// The selected file can never be read
    FileMissing,
    /// Nothing is selected
    #[default]
    NoneAvailable,
}

/// The selection, as seen by [`decide`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionInputs<'a> {
    /// The program is running; nothing should be fetched
    pub running: bool,
    /// File to show
    pub fullname: Option<&'a str>,
    /// Line to show, defaults to 1
    pub line: Option<u32>,
    /// Current instruction address, in paused-frame mode
    pub addr: Option<&'a str>,
    /// Following a paused frame
    pub paused: bool,
}

/// Range of lines around the selected line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineWindow {
    /// First line, at least 1
    pub start: u32,
    /// Last line
    pub end: u32,
    /// The selected line, clamped into the window
    pub line: u32,
}

impl LineWindow {
    /// Center a window of `max_lines` on `line`, clamped to the file when
    /// its length is known
    pub fn around(line: u32, max_lines: u32, num_lines: Option<u32>) -> Self {
        let mut start = line.saturating_sub(max_lines.div_ceil(2)).max(1);
        let mut end = start.saturating_add(max_lines);
        if let Some(num_lines) = num_lines {
            end = end.min(num_lines);
            if start > end {
                start = end.saturating_sub(max_lines).max(1);
            }
        }
        Self { start, end, line: line.min(end) }
    }
}

/// Work needed to show the selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAction {
    /// Read these lines from disk
    Source(SourceJob),
    /// Disassemble `[start, end]` with no source attached
    RawAssembly {
        /// First address
        start: u64,
        /// Last address
        end: u64,
    },
}

/// Outcome of [`decide`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// New state of the source view
    pub state: SourceCodeState,
    /// Lines to display
    pub window: LineWindow,
    /// Work to start, if not already in progress
    pub fetch: Option<FetchAction>,
    /// A path found to be unreadable that must be remembered as missing
    pub mark_missing: Option<String>,
}

/// Decide what the source view shows. Returns `None` while running.
pub fn decide(
    cache: &SourceCache,
    inputs: &SelectionInputs<'_>,
    max_lines: u32,
    raw_span: u64,
) -> Option<Decision> {
    if inputs.running {
        return None;
    }

    let fullname = inputs.fullname.filter(|f| !f.is_empty());
    let mut mark_missing = None;
    let mut missing = false;
    if let Some(path) = fullname {
        missing = cache.is_missing(path);
        if !missing && !is_resolvable_path(path) {
            mark_missing = Some(path.to_string());
            missing = true;
        }
    }

    let num_lines = fullname.and_then(|f| cache.num_lines(f));
    let window = LineWindow::around(inputs.line.unwrap_or(1), max_lines, num_lines);

    let (state, fetch) = match (fullname, inputs.addr) {
        (Some(path), _) if cache.is_line_cached(path, window.line) => {
            if cache.has_assembly(path, window.line) {
                (SourceCodeState::SourceAndAssemblyCached, None)
            } else {
                (SourceCodeState::SourceCached, None)
            }
        }
        (Some(path), _) if !missing => {
            let fetch = (!cache.is_being_fetched(path)).then(|| {
                FetchAction::Source(SourceJob {
                    fullname: path.to_string(),
                    start_line: window.start,
                    end_line: window.end,
                })
            });
            (SourceCodeState::FetchingSource, fetch)
        }
        (_, Some(addr)) if inputs.paused => decide_raw(cache, addr, raw_span),
        _ if missing => (SourceCodeState::FileMissing, None),
        _ => (SourceCodeState::NoneAvailable, None),
    };

    Some(Decision { state, window, fetch, mark_missing })
}

fn decide_raw(cache: &SourceCache, addr: &str, span: u64) -> (SourceCodeState, Option<FetchAction>) {
    let Some(addr) = parse_address(addr) else {
        return (SourceCodeState::AssemblyUnavailable, None);
    };
    match cache.raw_status(addr) {
        RawStatus::Cached => (SourceCodeState::AssemblyCached, None),
        RawStatus::Unfetchable => (SourceCodeState::AssemblyUnavailable, None),
        RawStatus::Unknown => {
            let fetch = (cache.raw_addr_being_fetched() != Some(addr))
                .then(|| FetchAction::RawAssembly { start: addr, end: addr.saturating_add(span) });
            (SourceCodeState::FetchingAssembly, fetch)
        }
    }
}
