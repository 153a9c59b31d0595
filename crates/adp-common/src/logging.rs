//! Logging configuration and initialization
//!
//! Centralized tracing setup for both ADP binaries. Console output is
//! always on; file output (daily-rotated, no ANSI) is added when a log
//! directory is configured. Use the structured macros (`info!`, `warn!`,
//! `error!`) everywhere; `println!` is reserved for the final CLI summary.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Directory for log files; `None` means console-only
    pub log_dir: Option<PathBuf>,

    /// Log file name prefix (e.g., "adp-ingest" -> "adp-ingest.2026-08-25.log")
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_dir: None,
            file_prefix: "adp".to_string(),
        }
    }
}

impl LogConfig {
    /// Build a config from the `--verbose` flag and the `ADP_LOG_DIR` /
    /// `LOG_LEVEL` environment variables
    pub fn from_env(file_prefix: &str, verbose: bool) -> Self {
        let mut config = Self {
            level: if verbose { LogLevel::Debug } else { LogLevel::Info },
            log_dir: std::env::var("ADP_LOG_DIR").ok().map(PathBuf::from),
            file_prefix: file_prefix.to_string(),
        };

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if let Ok(level) = level.parse() {
                config.level = level;
            }
        }

        config
    }
}

/// Initialize the global tracing subscriber
///
/// Should only be called once at application startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    let console_layer = fmt::layer().with_writer(std::io::stdout).with_target(true);

    match &config.log_dir {
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init()?;
        },
        Some(dir) => {
            std::fs::create_dir_all(dir).context("Failed to create log directory")?;

            let file_appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The guard must outlive the program; leak it so the writer
            // keeps flushing until exit.
            std::mem::forget(guard);

            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init()?;
        },
    }

    Ok(())
}
