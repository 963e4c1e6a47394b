//! Tracing setup: JSON to stderr plus a daily-rolling JSON file.
//!
//! Stdout is reserved for the batch report.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// The returned guard flushes the file writer when dropped; hold it until exit.
pub fn init_tracing(log_level: &str, logging: &LoggingConfig) -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(&logging.directory, &logging.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let level_filter = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
