//! # Loggers Module
//!
//! Installs the global `tracing` subscriber used by the binaries: a console layer
//! plus, optionally, a JSON layer written to a daily rotating file.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("A global subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// # Logging Options
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `info` or `lib_frames=debug`.
    pub level: String,
    /// Directory for rotating JSON log files. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    /// File name prefix of the rotating log files.
    pub file_prefix: String,
    /// Colored console output.
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "server_tail".to_string(),
            ansi: true,
        }
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so binaries keep it
/// alive for the whole run.
pub fn setup_tracing(options: &LoggingOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&options.level))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(options.ansi);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = rolling::daily(dir, &options.file_prefix);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging initialized with level: {}", options.level);
    Ok(guard)
}
