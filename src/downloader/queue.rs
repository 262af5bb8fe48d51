//! Job submission and read views.

use crate::classifier::validate_reference;
use crate::db::NewJob;
use crate::error::{Error, Result};
use crate::types::{Event, Job, JobId, JobOptions, QueueSummary};
use std::sync::atomic::Ordering;

use super::MediaDownloader;

impl MediaDownloader {
    /// Add a job to the queue
    ///
    /// The reference must be a magnet link or an absolute http(s) URL; anything else is
    /// rejected with [`Error::InvalidUrl`] and no job is created. Classification proper
    /// happens when the fetch stage claims the job, and again on every retry.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let id = downloader
    ///     .enqueue("https://example.com/video.mp4", "owner-1", JobOptions::default())
    ///     .await?;
    /// println!("queued as {}", id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue(&self, url: &str, owner_channel: &str, options: JobOptions) -> Result<JobId> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let url = url.trim();
        validate_reference(url)?;

        let id = self
            .db
            .insert_job(&NewJob {
                source_ref: url.to_string(),
                owner_channel: owner_channel.to_string(),
                title: options.title.filter(|t| !t.trim().is_empty()),
                priority: options.priority,
            })
            .await?;

        tracing::info!(job_id = id.0, priority = options.priority, "Job queued");
        self.emit_event(Event::Queued {
            id,
            source_ref: url.to_string(),
        });

        Ok(id)
    }

    /// Look up a job
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.db.get_job(id).await
    }

    /// All jobs in scheduling order
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.db.list_jobs().await
    }

    /// Count of jobs per status
    pub async fn queue_summary(&self) -> Result<QueueSummary> {
        self.db.queue_summary().await
    }

    /// 1-based position among the jobs waiting to be fetched
    ///
    /// `None` when the job is not waiting (active, paused, finished or unknown).
    pub async fn queue_position(&self, id: JobId) -> Result<Option<u32>> {
        self.db.queue_position(id).await
    }

    /// Job with the most recent activity for an owner
    pub async fn most_recent_job(&self, owner_channel: &str) -> Result<Option<Job>> {
        self.db.most_recent_job(owner_channel).await
    }
}
