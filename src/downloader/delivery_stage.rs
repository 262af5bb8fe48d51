//! Delivery stage: uploads fetched artifacts, one job at a time, independently of
//! the fetch stage. The two loops only meet through the job store.

use crate::db::ProgressUpdate;
use crate::deliver::{Delivered, ThrottledProgress};
use crate::error::{Error, Result};
use crate::types::{Event, Job, JobId, Stage, Status};
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ActiveJob, MediaDownloader};

impl MediaDownloader {
    /// Start the delivery loop
    ///
    /// Same shape as the fetch loop. Shutdown does not interrupt an upload in
    /// progress: partial uploads cannot be resumed, so the loop finishes the current
    /// job and then exits.
    pub(crate) fn start_delivery_loop(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();

        tokio::spawn(async move {
            let shutdown = downloader.state.shutdown.clone();
            loop {
                if !downloader.state.accepting_new.load(Ordering::SeqCst) {
                    break;
                }

                let pause = match downloader.deliver_next().await {
                    Ok(true) => continue,
                    Ok(false) => downloader.config.pipeline.poll_interval,
                    Err(e) => {
                        tracing::error!(error = %e, "Delivery loop error");
                        downloader.config.pipeline.error_backoff
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
            tracing::debug!("Delivery loop stopped");
        })
    }

    /// Claim and deliver one fetched job; returns whether a job was found
    pub(crate) async fn deliver_next(&self) -> Result<bool> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let delivery = &self.config.delivery;
        let Some(job) = self
            .db
            .next_deliverable(delivery.max_attempts, delivery.retry_delay)
            .await?
        else {
            return Ok(false);
        };
        if !self.db.claim_for_delivery(job.id).await? {
            tracing::debug!(job_id = job.id.0, "Job changed before it could be claimed");
            return Ok(true);
        }

        let token = CancellationToken::new();
        *self.state.delivery_slot.lock().await = Some(ActiveJob {
            id: job.id,
            token: token.clone(),
        });

        let result = self.process_delivery(&job, &token).await;
        *self.state.delivery_slot.lock().await = None;

        if let Err(e) = &result {
            tracing::error!(job_id = job.id.0, error = %e, "Delivery stage error");
            if let Err(e) = self.db.revert_delivery(job.id, &e.to_string()).await {
                tracing::error!(job_id = job.id.0, error = %e, "Failed to revert delivery");
            }
        }
        result.map(|_| true)
    }

    async fn process_delivery(&self, job: &Job, token: &CancellationToken) -> Result<()> {
        let id = job.id;

        let Some(path) = job.artifact_path.clone() else {
            return self.refetch(id, &Error::Other("no artifact recorded".to_string())).await;
        };

        tracing::info!(
            job_id = id.0,
            path = %path.display(),
            size = ?job.artifact_size,
            attempt = job.delivery_attempts + 1,
            "Delivery started"
        );

        let result = self.upload(job, &path, token).await;

        match result {
            Ok(Delivered { reference, channel }) => {
                if self.db.set_delivered(id, &reference.0, &channel).await? {
                    tracing::info!(
                        job_id = id.0,
                        channel = %channel,
                        delivery_ref = %reference,
                        "Job delivered"
                    );
                    self.emit_event(Event::Delivered {
                        id,
                        delivery_ref: reference.0,
                        channel,
                    });
                }
                self.discard_files(id, Some(&path)).await;
                Ok(())
            }
            Err(Error::Cancelled) => {
                tracing::info!(job_id = id.0, "Delivery cancelled");
                self.discard_files(id, Some(&path)).await;
                Ok(())
            }
            Err(e @ Error::ArtifactMissing(_)) => self.refetch(id, &e).await,
            Err(e) => self.settle_failed_delivery(id, &path, &e).await,
        }
    }

    /// Run the upload while forwarding throttled progress to the job row
    async fn upload(
        &self,
        job: &Job,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<Delivered> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut progress = ThrottledProgress::new(self.config.delivery.progress_interval, tx);

        let upload = self.components.deliverer.deliver(
            path,
            &job.owner_channel,
            job.title.as_deref(),
            &mut progress,
        );
        tokio::pin!(upload);

        loop {
            tokio::select! {
                result = &mut upload => return result,
                Some(update) = rx.recv() => self.record_delivery_progress(job.id, update).await,
                _ = token.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    async fn record_delivery_progress(&self, id: JobId, update: ProgressUpdate) {
        if let Err(e) = self.db.set_progress(id, update).await {
            tracing::warn!(job_id = id.0, error = %e, "Failed to record delivery progress");
        }
        tracing::debug!(
            job_id = id.0,
            percent = update.percent,
            rate = ?update.rate_out,
            "Delivery progress"
        );
        self.emit_event(Event::Delivering {
            id,
            percent: update.percent,
            rate_bps: update.rate_out.unwrap_or(0),
            eta_seconds: update.eta_seconds,
        });
    }

    /// Return a failed delivery to `fetched`, or fail the job once attempts run out
    async fn settle_failed_delivery(&self, id: JobId, path: &Path, error: &Error) -> Result<()> {
        let message = error.to_string();
        let max_attempts = self.config.delivery.max_attempts;

        match self.db.revert_delivery(id, &message).await? {
            Some(attempt) if attempt >= max_attempts => {
                tracing::error!(job_id = id.0, attempt, error = %message, "Delivery failed permanently");
                if self.db.set_status(id, Status::Failed, Some(&message)).await? {
                    self.emit_event(Event::Failed {
                        id,
                        stage: Stage::Deliver,
                        error: message,
                    });
                }
                self.discard_files(id, Some(path)).await;
            }
            Some(attempt) => {
                let delay = self.config.delivery.retry_delay;
                tracing::warn!(
                    job_id = id.0,
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    error = %message,
                    "Delivery failed, will retry"
                );
                self.emit_event(Event::RetryScheduled {
                    id,
                    attempt,
                    delay_secs: delay.as_secs(),
                    error: message,
                });
            }
            None => {
                // Cancelled while uploading
                self.discard_files(id, Some(path)).await;
            }
        }
        Ok(())
    }

    /// The artifact is gone: send the job back to the fetch stage
    async fn refetch(&self, id: JobId, error: &Error) -> Result<()> {
        let message = error.to_string();
        tracing::warn!(job_id = id.0, error = %message, "Artifact missing, job will be fetched again");
        self.db.set_status(id, Status::Pending, Some(&message)).await?;
        Ok(())
    }
}
