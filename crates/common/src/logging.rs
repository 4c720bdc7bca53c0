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

//! Logging configuration for MIDB components
//!
//! Provides centralized logging setup with:
//! - Structured console output for short-lived tools and tests
//! - File-only output for the interactive frontend, whose terminal belongs to gdb
//! - Environment variable support (RUST_LOG)

use eyre::Result;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Once,
};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::paths::log_directory;

/// Initialize logging for MIDB components
///
/// This function sets up:
/// - Colorful, structured console logging with timestamps
/// - Optionally, file logging with daily rotation
/// - Environment variable support for log levels (RUST_LOG)
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "midb")
/// * `enable_file_logging` - Whether to also write a rolling log file
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = default_filter("info")?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .compact();

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;
        let file_layer = file_layer(component_name, &log_dir);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer.with_filter(EnvFilter::from_default_env()))
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    log_environment_info(component_name);

    Ok(())
}

/// Initialize logging that writes only to a rolling file.
///
/// The interactive frontend shares its terminal with the debuggee and
/// gdb's console stream, so nothing may be written to stdout/stderr.
/// Returns the directory the log files land in.
pub fn init_file_only_logging(component_name: &str) -> Result<PathBuf> {
    let env_filter = default_filter("debug")?;
    let log_dir = create_log_directory(component_name)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer(component_name, &log_dir))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize file logging: {e}"))?;

    tracing::info!(
        component = component_name,
        log_dir = %log_dir.display(),
        "Logging initialized with file output only"
    );
    log_environment_info(component_name);

    Ok(log_dir)
}

fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre::eyre!("Failed to create environment filter: {e}"))
}

fn file_layer<S>(component_name: &str, log_dir: &Path) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let file_appender = rolling::daily(log_dir, format!("{component_name}.log"));
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    // The writer must outlive every span; the process owns it until exit.
    std::mem::forget(guard);

    fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(false)
        .with_writer(non_blocking_appender)
}

/// Create the log directory for a component
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = log_directory(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

fn log_environment_info(component_name: &str) {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let args: Vec<String> = env::args().collect();

    tracing::info!(
        component = component_name,
        rust_log = %rust_log,
        args = ?args,
        "Environment information"
    );

    if let Ok(current_dir) = env::current_dir() {
        tracing::debug!(working_directory = %current_dir.display(), "Working directory");
    }
}

/// Initialize simple logging (console only, no fancy formatting)
///
/// This is useful for tests or simple utilities that don't need
/// the full logging setup.
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = default_filter(level.as_str())?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {e}"))?;

    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Safe logging initialization for tests - can be called multiple times without crashing
///
/// Console-only output, INFO by default unless `default_level` or RUST_LOG
/// says otherwise.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let default_level = default_level.unwrap_or(Level::INFO);
        // A subscriber may already be installed by another harness.
        let _ = init_simple_logging(default_level);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, error, info, warn};

    #[test]
    fn test_logging_functions_work() {
        ensure_test_logging(None);

        info!("Test info message");
        warn!("Test warning message");
        debug!("Test debug message");
        error!("Test error message");
    }

    #[test]
    fn test_ensure_test_logging_is_idempotent() {
        ensure_test_logging(Some(Level::DEBUG));
        ensure_test_logging(Some(Level::TRACE));
        ensure_test_logging(None);
    }

    #[test]
    #[serial_test::serial]
    fn test_log_directory_creation() {
        let tmp = tempfile::tempdir().unwrap();
        env::set_var(crate::paths::LOG_DIR_ENV, tmp.path());
        let dir = create_log_directory("midb-test").unwrap();
        env::remove_var(crate::paths::LOG_DIR_ENV);

        assert_eq!(dir, tmp.path());
        assert!(dir.exists());
    }
}
