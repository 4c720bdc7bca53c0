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

//! MIDB - GDB Machine Interface Frontend
//!
//! Runs gdb with `--interpreter=mi2` and drives it from a line-oriented
//! prompt.

use std::path::PathBuf;

use clap::Parser;
use eyre::Result;
use midb_session::SessionConfig;

mod commands;
mod driver;
mod render;

/// Command-line interface for MIDB
#[derive(Debug, Parser)]
#[command(name = "midb")]
#[command(about = "MIDB - a terminal frontend for gdb's machine interface")]
#[command(version)]
pub struct Cli {
    /// gdb executable to run
    #[arg(long, env = "MIDB_GDB", default_value = "gdb")]
    pub gdb: String,

    /// Configuration file (default: ~/.midb.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Echo every command sent to gdb
    #[arg(long)]
    pub show_sent: bool,

    /// Source lines fetched around the line of interest
    #[arg(long, allow_negative_numbers = true)]
    pub max_lines: Option<i64>,

    /// Seconds to wait for a gdb response before warning
    #[arg(long)]
    pub watchdog_secs: Option<u64>,

    /// gdb command to run at startup, e.g. "source ~/.gdbinit"
    #[arg(long)]
    pub init_command: Option<String>,

    /// Connect to a gdbserver at HOST:PORT
    #[arg(long)]
    pub remote: Option<String>,

    /// Do not insert a breakpoint on main after loading the program
    #[arg(long)]
    pub no_main_breakpoint: bool,

    /// Extra argument passed to gdb itself (repeatable)
    #[arg(long = "gdb-arg", allow_hyphen_values = true)]
    pub gdb_args: Vec<String>,

    /// Program to debug
    pub program: Option<String>,

    /// Arguments of the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Configuration from disk with command-line overrides applied
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_path(path)?,
            None => SessionConfig::load().unwrap_or_else(|e| {
                tracing::warn!("Using the default configuration: {e}");
                SessionConfig::default()
            }),
        };
        if self.show_sent {
            config.show_all_sent_commands_in_console = true;
        }
        if let Some(lines) = self.max_lines {
            config.set_max_lines_of_code_to_fetch(lines);
        }
        if let Some(secs) = self.watchdog_secs {
            config.watchdog_timeout_secs = secs.max(1);
        }
        if self.no_main_breakpoint {
            config.auto_add_breakpoint_to_main = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = midb_common::logging::init_file_only_logging("midb")?;
    tracing::info!("Writing logs to {}", log_dir.display());

    let config = cli.session_config()?;
    tracing::debug!(?config, "Session configuration");

    let options = driver::DriverOptions {
        gdb: cli.gdb,
        gdb_args: cli.gdb_args,
        program: cli.program,
        program_args: cli.args,
        remote: cli.remote,
        init_command: cli.init_command,
    };
    driver::run(config, options).await?;

    tracing::info!("Shutting down MIDB...");
    Ok(())
}
