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

//! MIDB Common - Shared functionality for MIDB components
//!
//! This crate provides the pieces shared by the session core and the
//! `midb` binary: logging setup and the on-disk locations MIDB uses.

/// Logging setup and utilities for consistent logging across MIDB components
pub mod logging;
/// Well-known filesystem locations (config file, log directory)
pub mod paths;

pub use logging::*;
pub use paths::*;
