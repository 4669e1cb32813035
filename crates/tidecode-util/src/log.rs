//! Tracing initialization for the tidecode daemon.
//!
//! The daemon shares its terminal with the PTY sessions it brokers, so
//! diagnostics default to a log file under the data directory; stderr
//! output is opt-in for foreground debugging runs.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How the process logs.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset
    /// (e.g. `"info"`, `"tidecode_mcp=debug"`).
    pub directive: String,
    /// Log file sink; `None` disables file logging.
    pub file: Option<PathBuf>,
    /// Also print to stderr (foreground runs).
    pub stderr: bool,
    /// Include file/line locations in output.
    pub include_location: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            directive: "info".to_string(),
            file: default_log_file(),
            stderr: false,
            include_location: false,
        }
    }
}

/// Default log file under the data directory.
pub fn default_log_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("tidecode").join("logs").join("tidecode.log"))
}

/// Install the global subscriber. Call once at process startup.
///
/// `RUST_LOG` overrides the configured directive. The log file (and its
/// parent directories) are created eagerly so a failing sink surfaces at
/// startup, not at first write.
pub fn init(options: LogOptions) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.directive));

    let file_layer = match &options.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(options.include_location)
                    .with_line_number(options.include_location)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer = options.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(options.include_location)
            .with_line_number(options.include_location)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}
