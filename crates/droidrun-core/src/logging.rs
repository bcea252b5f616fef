//! File logging through tracing
//!
//! Output goes to a daily-rolling file so the terminal stays free for
//! progress messages and JSON events.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "DROIDRUN_LOG";

const DEFAULT_FILTER: &str = "droidrun=info,warn";
const LOG_FILE_PREFIX: &str = "droidrun.log";

/// Install the global subscriber
///
/// Logs are written to [`log_directory()`]; the level comes from
/// `DROIDRUN_LOG`.
///
/// ```bash
/// DROIDRUN_LOG=debug droidrun run --apk app.apk --package com.example.app --class MainActivity
/// DROIDRUN_LOG=droidrun_app=trace droidrun devices
/// ```
pub fn init() -> Result<()> {
    let dir = log_directory();
    std::fs::create_dir_all(&dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("droidrun {} starting, logging to {}", env!("CARGO_PKG_VERSION"), dir.display());
    Ok(())
}

/// `<data_local_dir>/droidrun/logs`, or `./droidrun/logs` without a data directory
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("droidrun")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_app_specific() {
        let dir = log_directory();
        assert!(dir.ends_with("droidrun/logs"));
    }
}
