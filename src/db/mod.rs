//! Job Store: SQLite persistence for the job queue
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job CRUD, scheduling queries and stage transitions
//! - [`state`] - Runtime state (clean shutdown tracking)
//!
//! Every write refreshes `updated_at`. Status writes never move a job out of
//! `cancelled`, so a cancel issued while a stage is running always wins.

use crate::types::{Job, JobId, Status, Strategy};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod jobs;
mod migrations;
mod state;

/// New job to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Submitted URL or magnet
    pub source_ref: String,
    /// Destination for delivery
    pub owner_channel: String,
    /// Caller-supplied title
    pub title: Option<String>,
    /// Scheduling priority (higher runs first)
    pub priority: i32,
}

/// Telemetry written on each progress tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Percent complete (0-100)
    pub percent: u8,
    /// Download rate in bytes per second
    pub rate_in: Option<u64>,
    /// Upload rate in bytes per second
    pub rate_out: Option<u64>,
    /// Estimated seconds remaining
    pub eta_seconds: Option<u64>,
}

/// Job record as stored in the `jobs` table
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    id: i64,
    source_ref: String,
    strategy: Option<String>,
    status: String,
    progress: i64,
    transfer_rate_in: Option<i64>,
    transfer_rate_out: Option<i64>,
    eta_seconds: Option<i64>,
    retry_count: i64,
    priority: i64,
    paused: bool,
    pause_reason: Option<String>,
    cancel_requested: bool,
    title: Option<String>,
    expected_size: Option<i64>,
    artifact_path: Option<String>,
    artifact_size: Option<i64>,
    delivery_ref: Option<String>,
    delivery_channel: Option<String>,
    delivery_attempts: i64,
    owner_channel: String,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn non_negative(value: Option<i64>) -> Option<u64> {
    value.map(|v| v.max(0) as u64)
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: JobId(row.id),
            source_ref: row.source_ref,
            strategy: row.strategy.as_deref().and_then(Strategy::from_db),
            status: Status::from_db(&row.status),
            progress: row.progress.clamp(0, 100) as u8,
            transfer_rate_in: non_negative(row.transfer_rate_in),
            transfer_rate_out: non_negative(row.transfer_rate_out),
            eta_seconds: non_negative(row.eta_seconds),
            retry_count: row.retry_count.max(0) as u32,
            priority: row.priority as i32,
            paused: row.paused,
            pause_reason: row.pause_reason,
            cancel_requested: row.cancel_requested,
            title: row.title,
            expected_size: non_negative(row.expected_size),
            artifact_path: row.artifact_path.map(PathBuf::from),
            artifact_size: non_negative(row.artifact_size),
            delivery_ref: row.delivery_ref,
            delivery_channel: row.delivery_channel,
            delivery_attempts: row.delivery_attempts.max(0) as u32,
            owner_channel: row.owner_channel,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column list shared by every job SELECT
pub(crate) const JOB_COLUMNS: &str = r#"
    id, source_ref, strategy, status, progress,
    transfer_rate_in, transfer_rate_out, eta_seconds,
    retry_count, priority, paused, pause_reason, cancel_requested,
    title, expected_size, artifact_path, artifact_size,
    delivery_ref, delivery_channel, delivery_attempts,
    owner_channel, error_message, created_at, updated_at
"#;

/// Scheduling order: higher priority first, then FIFO
pub(crate) const SCHEDULE_ORDER: &str = "priority DESC, created_at ASC, id ASC";

/// Current time in unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
