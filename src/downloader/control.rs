//! Job control: pause, resume, cancel, reorder, remove.
//!
//! Control calls may arrive while a stage is working on the same job. They write the
//! job row first and then signal the stage through its cancellation token; the stage
//! notices on its next poll tick and settles the final status.

use crate::error::{Error, JobError, Result};
use crate::types::{Event, Job, JobId, Status};

use super::{MediaDownloader, StageSlot};

impl MediaDownloader {
    /// Pause a job
    ///
    /// A paused job keeps its status and is skipped by both stages. Pausing a job that
    /// is being fetched stops the transfer and returns it to `pending`, still paused,
    /// so the next attempt starts once it is resumed. An upload already in progress is
    /// allowed to finish. Pausing an already paused job is a no-op.
    ///
    /// # Errors
    ///
    /// [`JobError::NotFound`] for an unknown id and [`JobError::InvalidState`] for a
    /// delivered, failed or cancelled job.
    pub async fn pause(&self, id: JobId, reason: Option<&str>) -> Result<()> {
        let job = self.require_job(id).await?;
        if job.status.is_terminal() {
            return Err(invalid_state(&job, "pause"));
        }
        if job.paused {
            return Ok(());
        }

        self.db.set_paused(id, true, reason).await?;
        if signal_slot(&self.state.fetch_slot, id).await {
            tracing::info!(job_id = id.0, "Stopping active fetch for pause");
        }

        tracing::info!(job_id = id.0, reason = reason.unwrap_or(""), "Job paused");
        self.emit_event(Event::Paused { id });
        Ok(())
    }

    /// Resume a paused job
    ///
    /// Priority and retry count are left untouched. Resuming a job that is not paused
    /// is a no-op.
    pub async fn resume(&self, id: JobId) -> Result<()> {
        let job = self.require_job(id).await?;
        if job.status.is_terminal() {
            return Err(invalid_state(&job, "resume"));
        }
        if !job.paused {
            return Ok(());
        }

        self.db.set_paused(id, false, None).await?;
        tracing::info!(job_id = id.0, "Job resumed");
        self.emit_event(Event::Resumed { id });
        Ok(())
    }

    /// Cancel a job
    ///
    /// The job moves to `cancelled` immediately and never leaves it. A running
    /// transfer or upload is stopped within one poll tick and any local artifact is
    /// deleted. Cancelling an already cancelled job is a no-op.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        let job = self.require_job(id).await?;
        match job.status {
            Status::Cancelled => return Ok(()),
            Status::Delivered | Status::Failed => return Err(invalid_state(&job, "cancel")),
            _ => {}
        }

        if !self.db.cancel(id).await? {
            // Finished between the read and the write
            return Ok(());
        }

        let fetching = signal_slot(&self.state.fetch_slot, id).await;
        let delivering = signal_slot(&self.state.delivery_slot, id).await;

        self.discard_files(id, job.artifact_path.as_deref()).await;

        tracing::info!(job_id = id.0, fetching, delivering, "Job cancelled");
        self.emit_event(Event::Cancelled { id });
        Ok(())
    }

    /// Set a job's absolute priority (higher runs first)
    pub async fn reorder(&self, id: JobId, priority: i32) -> Result<()> {
        self.require_job(id).await?;
        self.db.reorder(id, priority).await?;

        tracing::info!(job_id = id.0, priority, "Job reordered");
        self.emit_event(Event::Reordered { id, priority });
        Ok(())
    }

    /// Delete a job no stage is working on, together with its artifact
    pub async fn remove(&self, id: JobId) -> Result<()> {
        let job = self.require_job(id).await?;
        if job.status.is_active() {
            return Err(invalid_state(&job, "remove"));
        }

        if !self.db.delete_job(id).await? {
            // Claimed by a stage between the read and the delete
            let current = self.require_job(id).await?;
            return Err(invalid_state(&current, "remove"));
        }

        self.discard_files(id, job.artifact_path.as_deref()).await;

        tracing::info!(job_id = id.0, "Job removed");
        self.emit_event(Event::Removed { id });
        Ok(())
    }

    pub(crate) async fn require_job(&self, id: JobId) -> Result<Job> {
        self.db
            .get_job(id)
            .await?
            .ok_or(Error::Job(JobError::NotFound { id: id.0 }))
    }
}

/// Cancel the token of the job in `slot` if it is `id`
async fn signal_slot(slot: &StageSlot, id: JobId) -> bool {
    match slot.lock().await.as_ref() {
        Some(active) if active.id == id => {
            active.token.cancel();
            true
        }
        _ => false,
    }
}

fn invalid_state(job: &Job, operation: &str) -> Error {
    Error::Job(JobError::InvalidState {
        id: job.id.0,
        operation: operation.to_string(),
        current_state: job.status.to_string(),
    })
}
