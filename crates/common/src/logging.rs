//! Logging and tracing initialization.
//!
//! All records flow through one `tracing` subscriber. When a log file is
//! configured, the file layer writes through a `tracing-appender`
//! non-blocking writer: a single background thread owns the file and
//! serializes every record, so workers only ever hand records over.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{PpewatchError, PpewatchResult};

/// Keeps the background log writer alive. Dropping it flushes pending records.
#[must_use = "dropping the guard stops the log writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the tracing subscriber with the given configuration.
pub fn init_logging(config: &LoggingConfig) -> PpewatchResult<LogGuard> {
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(env_filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter())
            .boxed()
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter())
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| PpewatchError::config(format!("Failed to install log subscriber: {e}")))?;

    Ok(LogGuard { _file: guard })
}
