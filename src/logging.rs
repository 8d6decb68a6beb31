//! Console and rolling-file logging on top of `tracing`.

use std::path::Path;

use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Prefix of the daily log file in the cache directory.
pub(crate) const LOG_FILE_PREFIX: &str = "smugmirror";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// The returned guard flushes the file writer on drop and has to live until exit.
pub(crate) fn init(level: &str, verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|err| {
            eprintln!("Invalid log level '{}': {}. Falling back to info.", level, err);
            EnvFilter::new("info")
        });

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file, guard) = match log_dir.map(file_writer) {
        Some(Ok((writer, guard))) => {
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(err)) => {
            eprintln!("Failed to create log file: {}. Logging will only output to terminal.", err);
            (None, None)
        }
        None => (None, None),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {}", err);
    }

    debug!("Logging initialized at level {}", level);
    guard
}

fn file_writer(
    log_dir: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(log_dir)?;
    Ok(tracing_appender::non_blocking(appender))
}
