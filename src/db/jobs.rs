//! Job queue CRUD, scheduling queries and stage transitions.

use crate::error::DatabaseError;
use crate::types::{Job, JobId, QueueSummary, Status, Strategy};
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

use super::{Database, JOB_COLUMNS, JobRow, NewJob, ProgressUpdate, SCHEDULE_ORDER, now_millis};

fn query_failed(action: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        action, e
    )))
}

impl Database {
    /// Insert a new pending job
    pub async fn insert_job(&self, job: &NewJob) -> Result<JobId> {
        let now = now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                source_ref, status, priority, title, owner_channel,
                created_at, updated_at
            ) VALUES (?, 'pending', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.source_ref)
        .bind(job.priority)
        .bind(&job.title)
        .bind(&job.owner_channel)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("insert job", e))?;

        Ok(JobId(result.last_insert_rowid()))
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get job", e))?;

        Ok(row.map(Job::from))
    }

    /// List all jobs in scheduling order
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs ORDER BY {}",
            JOB_COLUMNS, SCHEDULE_ORDER
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list jobs", e))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    /// List jobs with a specific status in scheduling order
    pub async fn list_jobs_by_status(&self, status: Status) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY {}",
            JOB_COLUMNS, SCHEDULE_ORDER
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list jobs by status", e))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    /// Next job the fetch stage should claim
    ///
    /// Highest priority first, then earliest `created_at`. Paused and cancelled jobs
    /// are never returned. Jobs left in `fetching` by a crash are returned to
    /// `pending` by [`Database::recover_interrupted`] before the scheduler starts.
    pub async fn next_eligible(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status = 'pending' AND paused = 0 AND cancel_requested = 0
            ORDER BY {}
            LIMIT 1
            "#,
            JOB_COLUMNS, SCHEDULE_ORDER
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get next eligible job", e))?;

        Ok(row.map(Job::from))
    }

    /// Atomically move a pending job to `fetching`
    ///
    /// Returns false when the job was paused, cancelled or claimed since it was read.
    pub async fn claim_for_fetch(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'fetching', progress = 0,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                error_message = NULL, updated_at = ?
            WHERE id = ? AND status = 'pending' AND paused = 0 AND cancel_requested = 0
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("claim job for fetch", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Set a job's status, optionally recording an error message
    ///
    /// Entering `fetching` or `delivering` resets progress. Statuses outside
    /// `fetched`/`delivering`/`delivered` clear the artifact columns. A cancelled
    /// job is never moved. Returns whether the row changed.
    pub async fn set_status(&self, id: JobId, status: Status, error: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                error_message = COALESCE(?2, error_message),
                progress = CASE WHEN ?1 IN ('fetching', 'delivering') THEN 0 ELSE progress END,
                artifact_path = CASE WHEN ?1 IN ('fetched', 'delivering', 'delivered')
                    THEN artifact_path ELSE NULL END,
                artifact_size = CASE WHEN ?1 IN ('fetched', 'delivering', 'delivered')
                    THEN artifact_size ELSE NULL END,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?3
            WHERE id = ?4 AND status != 'cancelled'
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update status", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Write a progress tick for an active job
    ///
    /// Progress never decreases within a phase; telemetry is overwritten.
    pub async fn set_progress(&self, id: JobId, update: ProgressUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = MAX(progress, ?),
                transfer_rate_in = ?, transfer_rate_out = ?, eta_seconds = ?,
                updated_at = ?
            WHERE id = ? AND status IN ('fetching', 'delivering')
            "#,
        )
        .bind(i64::from(update.percent.min(100)))
        .bind(update.rate_in.map(|v| v as i64))
        .bind(update.rate_out.map(|v| v as i64))
        .bind(update.eta_seconds.map(|v| v as i64))
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update progress", e))?;

        Ok(())
    }

    /// Count one failed attempt and return the new total
    pub async fn increment_retry(&self, id: JobId) -> Result<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1, updated_at = ?
            WHERE id = ?
            RETURNING retry_count
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("increment retry count", e))?;

        count.map(|c| c.max(0) as u32).ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("Job {} not found", id)))
        })
    }

    /// Set or clear the pause flag
    pub async fn set_paused(&self, id: JobId, paused: bool, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET paused = ?, pause_reason = ?, updated_at = ?
            WHERE id = ? AND status != 'cancelled'
            "#,
        )
        .bind(paused)
        .bind(if paused { reason } else { None })
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update pause state", e))?;

        Ok(())
    }

    /// Request cancellation and move the job to `cancelled`
    ///
    /// Terminal jobs are left untouched. Returns whether the job was cancelled by this call.
    pub async fn cancel(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET cancel_requested = 1, status = 'cancelled',
                artifact_path = NULL, artifact_size = NULL,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE id = ? AND status NOT IN ('delivered', 'failed', 'cancelled')
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("cancel job", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether cancellation was requested for a job
    pub async fn is_cancel_requested(&self, id: JobId) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("check cancel flag", e))?;

        // A deleted row counts as cancelled so a running stage stops
        Ok(flag.unwrap_or(true))
    }

    /// Set a job's absolute priority
    pub async fn reorder(&self, id: JobId, priority: i32) -> Result<()> {
        sqlx::query("UPDATE jobs SET priority = ?, updated_at = ? WHERE id = ?")
            .bind(priority)
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("update priority", e))?;

        Ok(())
    }

    /// Record the strategy chosen for the current attempt
    pub async fn set_strategy(&self, id: JobId, strategy: Strategy) -> Result<()> {
        sqlx::query("UPDATE jobs SET strategy = ?, updated_at = ? WHERE id = ?")
            .bind(strategy.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("update strategy", e))?;

        Ok(())
    }

    /// Record extractor metadata; a caller-supplied title is kept
    pub async fn record_descriptor(
        &self,
        id: JobId,
        title: &str,
        expected_size: Option<u64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET title = COALESCE(title, ?), expected_size = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(expected_size.map(|v| v as i64))
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("record descriptor", e))?;

        Ok(())
    }

    /// Move a fetching job to `fetched` with its artifact
    pub async fn set_artifact(&self, id: JobId, path: &Path, size: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'fetched', artifact_path = ?, artifact_size = ?,
                progress = 100, error_message = NULL,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'fetching' AND cancel_requested = 0
            "#,
        )
        .bind(path.to_string_lossy().into_owned())
        .bind(size as i64)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("record artifact", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Next job the delivery stage should claim
    ///
    /// Jobs whose previous delivery failed wait `retry_delay` after their last update,
    /// and jobs that used up `max_attempts` are skipped.
    pub async fn next_deliverable(
        &self,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Option<Job>> {
        let ready_before = now_millis() - retry_delay.as_millis() as i64;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status = 'fetched' AND delivery_ref IS NULL
              AND paused = 0 AND cancel_requested = 0
              AND delivery_attempts < ?
              AND (delivery_attempts = 0 OR updated_at <= ?)
            ORDER BY {}
            LIMIT 1
            "#,
            JOB_COLUMNS, SCHEDULE_ORDER
        ))
        .bind(i64::from(max_attempts))
        .bind(ready_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get next deliverable job", e))?;

        Ok(row.map(Job::from))
    }

    /// Atomically move a fetched job to `delivering`
    pub async fn claim_for_delivery(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'delivering', progress = 0,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'fetched' AND delivery_ref IS NULL
              AND paused = 0 AND cancel_requested = 0
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("claim job for delivery", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a successful delivery
    pub async fn set_delivered(&self, id: JobId, delivery_ref: &str, channel: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'delivered', delivery_ref = ?, delivery_channel = ?,
                progress = 100, error_message = NULL,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'delivering'
            "#,
        )
        .bind(delivery_ref)
        .bind(channel)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("record delivery", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Return a failed delivery to `fetched` and count the attempt
    ///
    /// Returns the number of failed delivery attempts, or `None` when the job
    /// was no longer delivering (e.g., cancelled meanwhile).
    pub async fn revert_delivery(&self, id: JobId, error: &str) -> Result<Option<u32>> {
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'fetched', delivery_attempts = delivery_attempts + 1,
                error_message = ?, progress = 0,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'delivering'
            RETURNING delivery_attempts
            "#,
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("revert delivery", e))?;

        Ok(attempts.map(|a| a.max(0) as u32))
    }

    /// Count jobs per status
    pub async fn queue_summary(&self) -> Result<QueueSummary> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("summarize queue", e))?;

        let mut summary = QueueSummary::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match Status::from_db(&status) {
                Status::Pending => summary.pending += count,
                Status::Fetching => summary.fetching += count,
                Status::Fetched => summary.fetched += count,
                Status::Delivering => summary.delivering += count,
                Status::Delivered => summary.delivered += count,
                Status::Failed => summary.failed += count,
                Status::Cancelled => summary.cancelled += count,
            }
        }

        let paused: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE paused = 1 AND status NOT IN ('delivered', 'failed', 'cancelled')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("count paused jobs", e))?;
        summary.paused = paused.max(0) as u64;

        Ok(summary)
    }

    /// 1-based position of a pending job among the jobs the scheduler will run
    ///
    /// Returns `None` for jobs that are not waiting to be fetched (including paused ones).
    pub async fn queue_position(&self, id: JobId) -> Result<Option<u32>> {
        let Some(job) = self.get_job(id).await? else {
            return Ok(None);
        };
        if job.status != Status::Pending || job.paused || job.cancel_requested {
            return Ok(None);
        }

        let ahead: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE status = 'pending' AND paused = 0 AND cancel_requested = 0
              AND (priority > ?1
                   OR (priority = ?1 AND created_at < ?2)
                   OR (priority = ?1 AND created_at = ?2 AND id < ?3))
            "#,
        )
        .bind(job.priority)
        .bind(job.created_at)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("get queue position", e))?;

        Ok(Some(ahead.max(0) as u32 + 1))
    }

    /// Job with the most recent activity for an owner
    pub async fn most_recent_job(&self, owner_channel: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE owner_channel = ? ORDER BY updated_at DESC, id DESC LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(owner_channel)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get most recent job", e))?;

        Ok(row.map(Job::from))
    }

    /// Delete a job that no stage is working on
    ///
    /// Returns false when the job does not exist or is fetching/delivering.
    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE id = ? AND status NOT IN ('fetching', 'delivering')")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("delete job", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Reset jobs left active by a previous process
    ///
    /// `fetching` jobs go back to `pending` with progress and artifact cleared, since
    /// engine handles do not survive a restart. `delivering` jobs go back to `fetched`.
    /// Returns `(requeued_fetches, requeued_deliveries)`.
    pub async fn recover_interrupted(&self) -> Result<(u64, u64)> {
        let now = now_millis();

        let fetches = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', progress = 0,
                artifact_path = NULL, artifact_size = NULL,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE status = 'fetching'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("recover interrupted fetches", e))?;

        let deliveries = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'fetched', progress = 0,
                transfer_rate_in = NULL, transfer_rate_out = NULL, eta_seconds = NULL,
                updated_at = ?
            WHERE status = 'delivering'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("recover interrupted deliveries", e))?;

        Ok((fetches.rows_affected(), deliveries.rows_affected()))
    }
}
