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

//! Client-side core of a GDB/MI session.
//!
//! The crate holds no I/O of its own apart from reading source files. A
//! driver feeds decoded record batches into [`Session::handle`] and carries
//! out the [`Outbound`] requests the session emits: command batches for gdb
//! and source windows to read from disk.
//!
//! ```text
//! gdb stdout -> decode -> RecordBatcher -> Session::handle -> state / tree / cache
//!                                                 |
//!                     Outbound::Commands <--------+--------> Outbound::ReadSource
//! ```

pub mod classifier;
pub mod config;
pub mod console;
pub mod decode;
pub mod dispatcher;
pub mod queue;
pub mod record;
pub mod selection;
pub mod session;
pub mod source;
pub mod state;
pub mod token;
pub mod varobj;

pub use config::SessionConfig;
pub use console::{ConsoleEntryKind, ConsoleEvent};
pub use decode::{decode_line, DecodeError, RecordBatcher};
pub use dispatcher::{CommandBatch, ConnectionState, Outbound, SendOutcome};
pub use record::{ProtocolRecord, RecordKind, Stream};
pub use selection::SourceCodeState;
pub use session::Session;
pub use source::{read_source_window, SourceJob, SourceWindow};
pub use state::{RunState, SessionSnapshot, SessionState};
pub use token::SentinelToken;
pub use varobj::{ExprType, VarObj, VarObjTree};
