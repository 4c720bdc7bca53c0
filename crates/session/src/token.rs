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

//! Reserved correlation tokens.
//!
//! The debugger echoes a numeric prefix of a command back on its result
//! record. A few values are reserved to route results that cannot be
//! recognized from their payload alone.

use serde::{Deserialize, Serialize};

/// Token values with special routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum SentinelToken {
    /// Failures of this command are expected and never surfaced
    IgnoreErrors = 1,
    /// Disassembly of a bare address with no source file
    RawDisassembly = 2,
    /// Creation of a new variable object
    CreateVar = 3,
    /// Disassembly interleaved with a source file
    InlineDisassembly = 4,
    /// Listing the children of a variable object
    ListChildren = 5,
}

impl SentinelToken {
    /// Numeric value sent on the wire
    pub const fn value(self) -> u64 {
        self as u64
    }

    /// Prefix `command` with this token
    pub fn tag(self, command: impl AsRef<str>) -> String {
        format!("{}{}", self.value(), command.as_ref())
    }

    /// Recognize a token echoed on a record
    pub fn from_token(token: Option<u64>) -> Option<Self> {
        match token? {
            1 => Some(Self::IgnoreErrors),
            2 => Some(Self::RawDisassembly),
            3 => Some(Self::CreateVar),
            4 => Some(Self::InlineDisassembly),
            5 => Some(Self::ListChildren),
            _ => None,
        }
    }

    /// Whether `token` is this sentinel
    pub fn matches(self, token: Option<u64>) -> bool {
        token == Some(self.value())
    }
}
