//! Logging setup for the two ways this crate runs.
//!
//! Inside the host process everything goes to an append-only file, since the host
//! owns stdout/stderr. The CLI logs to stderr.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceLock<()> = OnceLock::new();

fn parse_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Whether a subscriber was installed by this module.
pub fn is_initialized() -> bool {
    INITIALIZED.get().is_some()
}

/// Open `log_file` for appending, creating its directory if needed.
fn file_appender(log_file: &Path) -> Result<RollingFileAppender> {
    let dir = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Log path has no file name: {:?}", log_file))?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {:?}", dir))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file: {:?}", log_file))
}

/// Append log lines to `log_file`. Only the first call has any effect.
pub fn init_file_logging(log_file: &Path, filter: &str) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let appender = file_appender(log_file)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(appender)
        .with_target(false)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(parse_filter(filter))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    let _ = INITIALIZED.set(());
    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over `default_filter` when set.
pub fn init_cli_logging(default_filter: &str) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    tracing_subscriber::registry()
        .with(parse_filter(&filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    let _ = INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_falls_back_to_info() {
        assert_eq!(parse_filter("capture=loudest").to_string(), "info");
        assert_eq!(parse_filter("debug").to_string(), "debug");
    }

    #[test]
    fn test_unopenable_log_file_is_an_error() {
        let err = file_appender(Path::new("/proc/webrtc-patcher.log")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open log file"));
    }

    #[test]
    fn test_log_path_without_file_name_is_an_error() {
        assert!(file_appender(Path::new("/")).is_err());
    }

    #[test]
    fn test_appender_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("nested").join("patcher.log");
        file_appender(&log_file).unwrap();
        assert!(log_file.exists());
    }

    #[test]
    fn test_file_logging_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("patcher.log");

        init_file_logging(&log_file, "info").unwrap();
        init_file_logging(&log_file, "debug").unwrap();
        init_cli_logging("trace").unwrap();

        tracing::info!("logging initialised");
        let contents = std::fs::read_to_string(&log_file).unwrap();
        assert!(contents.contains("logging initialised"));
    }
}
