//! Error types for media-dl
//!
//! Errors are grouped the way the pipeline treats them:
//! - Classification errors (`InvalidUrl`) are returned to the caller before a job exists
//! - Stage errors (`Extraction`, `Transfer`, `SizeLimit`, `Delivery`) become status
//!   transitions plus an `error_message` on the job
//! - Infrastructure errors (`Database`, `Io`, ...) are logged at the loop level and retried

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "engine.rpc_url")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job control error (not found, wrong state)
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Submitted reference is not a usable URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// No fetchable descriptor could be resolved
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Resource is larger than the configured ceiling
    #[error("File too large: {:.2} GB (max: {} GB)", gib(.size), gib(.limit))]
    SizeLimit {
        /// Size of the resource in bytes
        size: u64,
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// Fetch engine reported a failed transfer
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Delivery backend rejected or failed the upload
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Artifact expected on disk is gone
    #[error("artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// External tool execution failed (yt-dlp, page capture helper)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unconfigured channel)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Work was cancelled by the user or by shutdown
    #[error("cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn gib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Job control errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found in the store
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "pause", "remove")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}
