//! Configuration management

use crate::error::{AdpError, Result};
use std::path::PathBuf;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/adp";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default snapshot root directory.
pub const DEFAULT_SNAPSHOT_DIR: &str = "./snapshot";

/// Default directory for per-entity processing state files.
pub const DEFAULT_STATE_DIR: &str = "./state";

/// Default directory for orphan manifests and reconciliation reports.
pub const DEFAULT_MANIFEST_DIR: &str = "./manifests";

/// Default number of buffered rows per table before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Default number of concurrently processed snapshot files.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default hard wall-clock budget for one snapshot file (4 hours).
pub const DEFAULT_FILE_TIMEOUT_SECS: u64 = 4 * 3600;

/// Default decoder progress-report interval, in lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// Default orphan-rate threshold above which cleanup requires confirmation.
pub const DEFAULT_ORPHAN_THRESHOLD: f64 = 0.01;

/// Default number of orphaned identifiers sampled into each manifest.
pub const DEFAULT_SAMPLE_SIZE: i64 = 50;

/// Line cap applied by `--test` smoke runs.
pub const TEST_LINE_CAP: u64 = 1_000;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Top-level ADP configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct AdpConfig {
    pub database: DatabaseConfig,

    /// Root of the snapshot tree (`data/<entity>/updated_date=*/part_*.gz`)
    pub snapshot_dir: PathBuf,

    /// Directory holding per-entity state files, locks, and error logs
    pub state_dir: PathBuf,

    /// Directory receiving orphan manifests and reconciliation reports
    pub manifest_dir: PathBuf,

    /// Rows buffered per table before a bulk flush
    pub batch_size: usize,

    /// Concurrently processed snapshot files
    pub max_workers: usize,

    /// Hard wall-clock budget per snapshot file, in seconds
    pub file_timeout_secs: u64,

    /// Decoder progress-report interval, in lines
    pub progress_interval: u64,

    /// Orphan-rate threshold gating automatic cleanup
    pub orphan_threshold: f64,

    /// Orphaned identifiers sampled per manifest
    pub sample_size: i64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AdpConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = AdpConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            snapshot_dir: std::env::var("ADP_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            state_dir: std::env::var("ADP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR)),
            manifest_dir: std::env::var("ADP_MANIFEST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_MANIFEST_DIR)),
            batch_size: env_parse("ADP_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            max_workers: env_parse("ADP_MAX_WORKERS", DEFAULT_MAX_WORKERS),
            file_timeout_secs: env_parse("ADP_FILE_TIMEOUT", DEFAULT_FILE_TIMEOUT_SECS),
            progress_interval: env_parse("ADP_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL),
            orphan_threshold: env_parse("ADP_ORPHAN_THRESHOLD", DEFAULT_ORPHAN_THRESHOLD),
            sample_size: env_parse("ADP_SAMPLE_SIZE", DEFAULT_SAMPLE_SIZE),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AdpError::Config("batch_size must be greater than 0".into()));
        }
        if self.max_workers == 0 {
            return Err(AdpError::Config("max_workers must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.orphan_threshold) {
            return Err(AdpError::Config(format!(
                "orphan_threshold must be within [0.0, 1.0], got {}",
                self.orphan_threshold
            )));
        }
        if self.sample_size < 0 {
            return Err(AdpError::Config("sample_size must be non-negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AdpConfig {
        AdpConfig {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            manifest_dir: PathBuf::from(DEFAULT_MANIFEST_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            file_timeout_secs: DEFAULT_FILE_TIMEOUT_SECS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            orphan_threshold: DEFAULT_ORPHAN_THRESHOLD,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = base_config();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = base_config();
        config.orphan_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
