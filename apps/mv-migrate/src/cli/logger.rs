//! # Logger Module
//!
//! Logging is built from `tracing-subscriber` layers:
//! - **EnvFilter Layer**: `RUST_LOG` support for module-level filtering, falling back to the
//!   configured level
//! - **Format Layer**: compact text or JSON
//!
//! Logs go to stderr unless `stdout` is set, so that SQL printed by the CLI stays pipeable.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Standard Rust log filtering (e.g., `RUST_LOG=mv_migrate::infrastructure=debug`)
//! - `MV_MIGRATE_LOGGER__LEVEL`: Log level (DEBUG, INFO, WARN, ERROR)
//! - `MV_MIGRATE_LOGGER__STDOUT`: Output to stdout instead of stderr (default: `false`)
//! - `MV_MIGRATE_LOGGER__FORMAT`: Text or Json (default: Text)

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum LoggerLevel {
    #[serde(alias = "DEBUG", alias = "debug")]
    Debug,
    #[serde(alias = "INFO", alias = "info")]
    Info,
    #[serde(alias = "WARN", alias = "warn")]
    Warn,
    #[serde(alias = "ERROR", alias = "error")]
    Error,
}

impl LoggerLevel {
    pub fn to_tracing_level(&self) -> LevelFilter {
        match self {
            LoggerLevel::Debug => LevelFilter::DEBUG,
            LoggerLevel::Info => LevelFilter::INFO,
            LoggerLevel::Warn => LevelFilter::WARN,
            LoggerLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    #[serde(alias = "json", alias = "JSON")]
    Json,
    #[serde(alias = "text", alias = "TEXT")]
    Text,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoggerSettings {
    #[serde(default = "default_log_level")]
    pub level: LoggerLevel,
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> LoggerLevel {
    LoggerLevel::Warn
}

fn default_log_stdout() -> bool {
    false
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggerSettings {
    fn default() -> Self {
        LoggerSettings {
            level: default_log_level(),
            stdout: default_log_stdout(),
            format: default_log_format(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("Failed to install the global subscriber")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

pub fn setup_logging(settings: &LoggerSettings) -> Result<(), LoggerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.to_tracing_level().to_string()));

    if settings.stdout {
        let format_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true);

        if settings.format == LogFormat::Json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(format_layer.json())
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(format_layer.compact())
                .try_init()?;
        }
    } else {
        let format_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);

        if settings.format == LogFormat::Json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(format_layer.json())
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(format_layer.compact())
                .try_init()?;
        }
    }

    Ok(())
}
