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

use std::{env, path::PathBuf};

/// Name of the user configuration file, relative to the home directory.
pub const CONFIG_FILE_NAME: &str = ".midb.toml";

/// Environment variable that overrides the log directory.
pub const LOG_DIR_ENV: &str = "MIDB_LOG_DIR";

/// Filesystem locations used by MIDB.
pub trait MidbPath {
    /// Root directory all other locations hang off, usually `$HOME`.
    fn midb_root(&self) -> Option<PathBuf>;

    /// Returns the path of the user config file: `<root>/.midb.toml`.
    fn config_file(&self) -> Option<PathBuf> {
        Some(self.midb_root()?.join(CONFIG_FILE_NAME))
    }
}

/// Default locations, rooted at the user's home directory.
#[derive(Debug, Clone)]
pub struct MidbPaths {
    root: Option<PathBuf>,
}

impl Default for MidbPaths {
    fn default() -> Self {
        Self { root: dirs::home_dir() }
    }
}

impl MidbPaths {
    /// Locations rooted at `root`, falling back to the home directory.
    pub fn new(root: Option<impl Into<PathBuf>>) -> Self {
        Self { root: root.map(Into::into).or_else(dirs::home_dir) }
    }
}

impl MidbPath for MidbPaths {
    fn midb_root(&self) -> Option<PathBuf> {
        self.root.clone()
    }
}

/// Directory log files for `component_name` are written to.
///
/// Honors `MIDB_LOG_DIR`; otherwise `<tmp>/midb-logs/<component>`.
pub fn log_directory(component_name: &str) -> PathBuf {
    match env::var_os(LOG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::temp_dir().join("midb-logs").join(component_name),
    }
}
