//! Structured logging: console output plus a rolling log file.
//!
//! `RUST_LOG` overrides the default `hoopwatch=info` filter, and
//! `HOOPWATCH_LOG_JSON` switches the console to JSON lines. The file
//! always gets plain text without colour codes.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Rolling appender for `cfg`, creating its directory if needed.
pub fn file_appender(cfg: &LoggingConfig) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(&cfg.directory)
        .with_context(|| format!("Failed to create log directory {}", cfg.directory))?;
    RollingFileAppender::builder()
        .rotation(cfg.rotation.into())
        .filename_prefix(cfg.file_name.clone())
        .max_log_files(cfg.max_files)
        .build(&cfg.directory)
        .with_context(|| format!("Failed to open log file in {}", cfg.directory))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hoopwatch=info"));
    let json = std::env::var("HOOPWATCH_LOG_JSON").is_ok();

    let appender = if cfg.file_enabled {
        match file_appender(cfg) {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("Warning: {e:#}, file logging disabled");
                None
            }
        }
    } else {
        None
    };

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_json = json.then(|| fmt::layer().json().with_target(true).with_thread_ids(true));
    let console_plain = (!json).then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_json)
        .with(console_plain)
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    if guard.is_some() {
        tracing::info!(directory = %cfg.directory, file = %cfg.file_name, "Logging to file");
    }
    Ok(guard)
}
