//! Tracing setup for the daemon binary.
//!
//! Logs always go to stderr, since stdout carries the protocol when serving
//! over standard streams. When a log directory is configured, a daily
//! rolling file receives the same events without ANSI colours.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix of the rolling log.
pub const LOG_FILE_PREFIX: &str = "fsgate.log";

/// Level used when `--verbose` is given.
pub const VERBOSE_LEVEL: &str = "debug";

/// Pick the effective level: `--verbose` wins over the configured one.
pub fn effective_level(configured: &str, verbose: bool) -> String {
    if verbose {
        VERBOSE_LEVEL.to_string()
    } else {
        configured.to_lowercase()
    }
}

/// Build the event filter. `RUST_LOG` takes precedence over `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level)),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept
/// alive for as long as the process logs.
pub fn init(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
