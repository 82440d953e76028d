//! Diagnostic logging setup
//!
//! Console output on stderr plus a daily-rotated file. Distinct from the
//! audit trail, which the engine writes itself.

use super::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Keep the guard alive until exit so buffered
/// lines reach the file.
pub fn init_tracing(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create log dir {}", config.dir))?;
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("tether")
        .filename_suffix("log")
        .max_log_files(config.retention_days.max(1))
        .build(&config.dir)
        .context("Failed to create log file appender")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let (json_layer, text_layer) = if config.json {
        (Some(fmt::layer().json().with_writer(writer)), None)
    } else {
        (None, Some(fmt::layer().with_ansi(false).with_writer(writer)))
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.level.as_str())),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
