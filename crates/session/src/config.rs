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

//! Session configuration persisted in `~/.midb.toml`.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{Context, Result};
use midb_common::{MidbPath, MidbPaths};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default number of source lines requested per window.
pub const DEFAULT_MAX_LINES_OF_CODE_TO_FETCH: u32 = 500;

/// Default seconds to wait for any debugger response before warning.
pub const DEFAULT_WATCHDOG_TIMEOUT_SECS: u64 = 10;

/// Tunables of a debugger session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without a response before the watchdog fires
    pub watchdog_timeout_secs: u64,
    /// Size of the source window fetched around a line of interest
    pub max_lines_of_code_to_fetch: u32,
    /// Echo every command we send into the console stream
    pub show_all_sent_commands_in_console: bool,
    /// Enable python pretty printers before creating variables
    pub pretty_print: bool,
    /// Capacity of the raw record audit ring
    pub audit_capacity: usize,
    /// Capacity of the console history
    pub console_capacity: usize,
    /// Pre-expand children whose name marks an anonymous struct or union
    pub auto_expand_anonymous: bool,
    /// Number of instructions requested for a file/line disassembly
    pub disassembly_instruction_count: u32,
    /// Bytes disassembled after an address that has no source file
    pub raw_disassembly_span: u64,
    /// Insert a breakpoint on `main` after loading a binary or connecting to a remote target
    pub auto_add_breakpoint_to_main: bool,
    /// Refresh program state after every console command
    pub refresh_state_after_console_command: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_secs: DEFAULT_WATCHDOG_TIMEOUT_SECS,
            max_lines_of_code_to_fetch: DEFAULT_MAX_LINES_OF_CODE_TO_FETCH,
            show_all_sent_commands_in_console: false,
            pretty_print: true,
            audit_capacity: 1000,
            console_capacity: 1000,
            auto_expand_anonymous: true,
            disassembly_instruction_count: 1000,
            raw_disassembly_span: 100,
            auto_add_breakpoint_to_main: true,
            refresh_state_after_console_command: true,
        }
    }
}

impl SessionConfig {
    /// Get the config file path (~/.midb.toml)
    pub fn config_path() -> Result<PathBuf> {
        MidbPaths::default()
            .config_file()
            .ok_or_else(|| eyre::eyre!("Unable to determine home directory"))
    }

    /// Load configuration from `~/.midb.toml`, creating the default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found, creating default at {:?}", config_path);
            let default_config = Self::default();
            default_config.save_to_path(&config_path)?;
            return Ok(default_config);
        }

        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config.normalized())
    }

    /// Save configuration to `~/.midb.toml`
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;

        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Watchdog timeout as a duration
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    /// Set the source window size. Non-positive sizes fall back to the default.
    pub fn set_max_lines_of_code_to_fetch(&mut self, lines: i64) {
        self.max_lines_of_code_to_fetch = match u32::try_from(lines) {
            Ok(n) if n > 0 => n,
            _ => DEFAULT_MAX_LINES_OF_CODE_TO_FETCH,
        };
    }

    fn normalized(mut self) -> Self {
        if self.max_lines_of_code_to_fetch == 0 {
            self.max_lines_of_code_to_fetch = DEFAULT_MAX_LINES_OF_CODE_TO_FETCH;
        }
        if self.watchdog_timeout_secs == 0 {
            self.watchdog_timeout_secs = DEFAULT_WATCHDOG_TIMEOUT_SECS;
        }
        self
    }
}
