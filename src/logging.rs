//! Logging configuration for querytask.
//!
//! Query output goes to stdout, so logs go to stderr by default. A file
//! writer is available for runs where stderr is captured or unwanted.

use std::fs::{self, File};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to stderr.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Initializes logging to the log file at [`get_log_path`].
///
/// Falls back to stderr logging if the file cannot be created.
pub fn init_file_logging() {
    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            init_stderr_logging();
            return;
        }
    }

    // Truncated on each run to avoid unbounded growth
    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {e}");
            init_stderr_logging();
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}

/// Returns the path for the log file.
///
/// Uses the XDG state directory on Linux (`~/.local/state/db-querytask/querytask.log`),
/// or falls back to the config directory on other platforms.
pub fn get_log_path() -> PathBuf {
    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("db-querytask").join("querytask.log");
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("db-querytask").join("querytask.log");
    }

    std::env::temp_dir().join("querytask.log")
}
