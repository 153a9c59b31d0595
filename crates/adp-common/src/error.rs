//! Error types for ADP

use thiserror::Error;

/// Result type alias for ADP operations
pub type Result<T> = std::result::Result<T, AdpError>;

/// Main error type for ADP
#[derive(Error, Debug)]
pub enum AdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("State lock already held: {0}")]
    LockUnavailable(String),

    #[error("Corrupt input stream in {path}: {source}")]
    CorruptStream {
        path: String,
        source: std::io::Error,
    },

    #[error("Batch write failed for table {table}: {message}")]
    BatchFailed { table: String, message: String },

    #[error("Primary key on {table} blocked by {count} duplicate key group(s)")]
    DuplicateKeys { table: String, count: i64 },

    #[error("File processing timed out after {timeout_secs}s: {path}")]
    FileTimeout { path: String, timeout_secs: u64 },

    #[error("Orphan cleanup declined by operator for {table}.{column}")]
    CleanupDeclined { table: String, column: String },

    #[error("Interrupted by operator")]
    Interrupted,
}
