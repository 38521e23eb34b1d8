//! Logging setup shared by the binaries.
//!
//! Every line passes through [`SanitizingMakeWriter`] before it reaches the
//! file or stdout.

use std::io::IsTerminal;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapters::sanitize::SanitizingMakeWriter;

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    File,
    Stdout,
}

/// Resolve `GLYCOSECURE_LOG_MODE` (`auto|file|stdout`).
///
/// `auto` logs to a file when stdout is a terminal, so interactive output
/// stays readable, and to stdout otherwise (containers, CI).
#[must_use]
pub fn log_target() -> LogTarget {
    let mode = std::env::var("GLYCOSECURE_LOG_MODE").unwrap_or_else(|_| "auto".to_string());
    match mode.trim() {
        "file" => LogTarget::File,
        "stdout" => LogTarget::Stdout,
        _ if std::io::stdout().is_terminal() => LogTarget::File,
        _ => LogTarget::Stdout,
    }
}

/// Install the global subscriber.
///
/// `default_file` is used when `GLYCOSECURE_LOG_FILE` is unset. Keep the
/// returned guard alive for the life of the process or buffered lines are
/// lost.
///
/// # Errors
/// Returns error if the log file cannot be opened.
pub fn init_logging(default_file: &str) -> std::io::Result<WorkerGuard> {
    let (writer, guard) = match log_target() {
        LogTarget::File => {
            let log_file =
                std::env::var("GLYCOSECURE_LOG_FILE").unwrap_or_else(|_| default_file.to_string());

            if let Some(parent) = Path::new(&log_file).parent() {
                // Best-effort: a missing directory surfaces on open below.
                let _ = std::fs::create_dir_all(parent);
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Stdout => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}
