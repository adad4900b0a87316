//! Structured Logging for the Repost Detector
//!
//! This module provides functionality for:
//! 1. Console output for every pipeline event
//! 2. An optional daily rolling log file in JSON or line format
//! 3. Level filtering from `RUST_LOG` or the `[logging]` config section

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::ChronoUtc},
    prelude::*,
};

use crate::repost::config_loader::LoggingSettings;

const LOG_FILE_PREFIX: &str = "repost_detector.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Log entry type, attached to events as `entry_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryType {
    Ingest,
    Match,
    Action,
    System,
}

impl std::fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEntryType::Ingest => write!(f, "ingest"),
            LogEntryType::Match => write!(f, "match"),
            LogEntryType::Action => write!(f, "action"),
            LogEntryType::System => write!(f, "system"),
        }
    }
}

/// Keeps the file writer alive. Dropping it flushes pending lines.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

/// `RUST_LOG` wins over the configured level.
pub fn build_filter(level: &str) -> LoggerResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Filter(e.to_string()))
}

/// Install the global subscriber.
pub fn init_logger(settings: &LoggingSettings) -> LoggerResult<Logger> {
    let filter = build_filter(&settings.log_level)?;
    let json = settings.log_format.eq_ignore_ascii_case("json");

    let console = if json {
        fmt::layer().json().with_timer(ChronoUtc::rfc_3339()).boxed()
    } else {
        fmt::layer().with_timer(ChronoUtc::rfc_3339()).boxed()
    };

    let (file_layer, guard) = if settings.log_to_file {
        let log_dir = PathBuf::from(&settings.log_directory);
        if !log_dir.exists() {
            std::fs::create_dir_all(&log_dir)?;
        }

        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let layer = if json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .boxed()
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        entry_type = %LogEntryType::System,
        log_format = %settings.log_format,
        log_level = %settings.log_level,
        log_to_file = settings.log_to_file,
        "Logger initialized"
    );

    Ok(Logger { _guard: guard })
}
