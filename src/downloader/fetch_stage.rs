//! Fetch stage: claims one pending job at a time and drives it through
//! classification, extraction and the fetch engine.

use crate::error::{Error, Result};
use crate::fetch::{FetchMonitor, FetchRequest, FetchedArtifact};
use crate::types::{Event, Job, JobId, Stage, Status};
use crate::utils::remove_job_dir;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{ActiveJob, MediaDownloader};

/// A failed attempt and where it failed
struct AttemptFailure {
    stage: Stage,
    error: Error,
    /// File the engine was writing to, if the transfer had been submitted
    partial: Option<PathBuf>,
}

impl AttemptFailure {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |error| Self {
            stage,
            error,
            partial: None,
        }
    }
}

impl MediaDownloader {
    /// Start the fetch loop
    ///
    /// The loop claims the next eligible job, runs it to a settled status (fetched,
    /// pending for a retry, failed or cancelled) and immediately looks for the next
    /// one. When nothing is eligible it sleeps `poll_interval`. Loop-level errors
    /// (an unreachable job store) are logged and followed by `error_backoff`; the loop
    /// only exits on shutdown.
    pub(crate) fn start_fetch_loop(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();

        tokio::spawn(async move {
            let shutdown = downloader.state.shutdown.clone();
            loop {
                if !downloader.state.accepting_new.load(Ordering::SeqCst) {
                    break;
                }

                let pause = match downloader.fetch_next().await {
                    Ok(true) => continue,
                    Ok(false) => downloader.config.pipeline.poll_interval,
                    Err(e) => {
                        tracing::error!(error = %e, "Fetch loop error");
                        downloader.config.pipeline.error_backoff
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
            tracing::debug!("Fetch loop stopped");
        })
    }

    /// Claim and process one job; returns whether a job was found
    pub(crate) async fn fetch_next(&self) -> Result<bool> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let Some(job) = self.db.next_eligible().await? else {
            return Ok(false);
        };
        if !self.db.claim_for_fetch(job.id).await? {
            tracing::debug!(job_id = job.id.0, "Job changed before it could be claimed");
            return Ok(true);
        }

        let token = CancellationToken::new();
        *self.state.fetch_slot.lock().await = Some(ActiveJob {
            id: job.id,
            token: token.clone(),
        });

        let result = self.process_fetch(&job, &token).await;
        *self.state.fetch_slot.lock().await = None;

        if let Err(e) = &result {
            // Do not leave the row stuck in `fetching`
            tracing::error!(job_id = job.id.0, error = %e, "Fetch stage error, requeueing job");
            if let Err(e) = self.db.set_status(job.id, Status::Pending, None).await {
                tracing::error!(job_id = job.id.0, error = %e, "Failed to requeue job");
            }
        }
        result.map(|_| true)
    }

    async fn process_fetch(&self, job: &Job, token: &CancellationToken) -> Result<()> {
        let id = job.id;
        tracing::info!(job_id = id.0, attempt = job.retry_count + 1, "Fetch started");

        match self.attempt_fetch(job, token).await {
            Ok(artifact) => {
                if self.db.set_artifact(id, &artifact.path, artifact.size).await? {
                    tracing::info!(
                        job_id = id.0,
                        path = %artifact.path.display(),
                        size = artifact.size,
                        "Job fetched"
                    );
                    self.emit_event(Event::Fetched {
                        id,
                        path: artifact.path,
                        size: artifact.size,
                    });
                } else {
                    // Cancelled while the last poll was in flight
                    self.discard_files(id, Some(&artifact.path)).await;
                }
                Ok(())
            }
            Err(AttemptFailure {
                error: Error::Cancelled,
                partial,
                ..
            }) => self.settle_interrupted(id, partial).await,
            // The job store is down, not the job: requeue without spending a retry
            Err(AttemptFailure {
                error: error @ (Error::Database(_) | Error::Sqlx(_)),
                ..
            }) => Err(error),
            Err(failure) => {
                self.discard_partial(id, failure.partial.as_deref()).await;
                self.retry
                    .on_failure(id, failure.stage, &failure.error, token)
                    .await?;
                Ok(())
            }
        }
    }

    /// Classify, extract and transfer
    async fn attempt_fetch(
        &self,
        job: &Job,
        token: &CancellationToken,
    ) -> std::result::Result<FetchedArtifact, AttemptFailure> {
        let id = job.id;

        let strategy = self
            .components
            .classifier
            .classify(&job.source_ref)
            .await
            .into_strategy(&job.source_ref)
            .map_err(AttemptFailure::at(Stage::Classify))?;
        self.db
            .set_strategy(id, strategy)
            .await
            .map_err(AttemptFailure::at(Stage::Classify))?;
        tracing::info!(job_id = id.0, strategy = ?strategy, "Job classified");
        self.emit_event(Event::Classified { id, strategy });

        let extractor = self
            .components
            .extractors
            .get(strategy)
            .map_err(AttemptFailure::at(Stage::Extract))?;
        let descriptor = tokio::select! {
            result = extractor.extract(&job.source_ref, id) => result,
            _ = token.cancelled() => Err(Error::Cancelled),
        }
        .map_err(AttemptFailure::at(Stage::Extract))?;

        self.db
            .record_descriptor(id, &descriptor.title, descriptor.expected_size)
            .await
            .map_err(AttemptFailure::at(Stage::Extract))?;
        tracing::info!(
            job_id = id.0,
            extractor = extractor.name(),
            title = %descriptor.title,
            expected_size = ?descriptor.expected_size,
            "Descriptor resolved"
        );

        let title = job.title.clone().unwrap_or_else(|| descriptor.title.clone());
        let request = FetchRequest::new(
            id,
            strategy,
            descriptor,
            self.config.pipeline.download_dir.clone(),
        );
        let partial = request.expected_path();
        self.emit_event(Event::FetchStarted { id, title });

        let monitor = FetchMonitor {
            engine: self.components.engine.as_ref(),
            db: &self.db,
            event_tx: &self.event_tx,
            poll_interval: self.config.engine.poll_interval,
            max_file_size: self.config.pipeline.max_file_size,
            min_free_space: self.config.pipeline.min_free_space,
            download_dir: &self.config.pipeline.download_dir,
        };
        monitor.run(&request, token).await.map_err(|error| AttemptFailure {
            stage: Stage::Fetch,
            error,
            partial,
        })
    }

    /// Settle a job whose attempt was stopped by its token
    ///
    /// A user cancel already moved the job to `cancelled`; only the partial file is
    /// left to clean up. A pause or a shutdown puts the job back to `pending` without
    /// spending a retry, keeping the partial file so the engine can continue it.
    async fn settle_interrupted(&self, id: JobId, partial: Option<PathBuf>) -> Result<()> {
        if self.db.is_cancel_requested(id).await? {
            self.discard_partial(id, partial.as_deref()).await;
            tracing::info!(job_id = id.0, "Fetch cancelled");
            return Ok(());
        }

        self.db.set_status(id, Status::Pending, None).await?;
        tracing::info!(job_id = id.0, "Fetch interrupted, job returned to the queue");
        Ok(())
    }

    /// Drop whatever an abandoned transfer wrote: the named partial file with its
    /// control file, and the job directory torrents are fetched into
    async fn discard_partial(&self, id: JobId, partial: Option<&Path>) {
        if let Some(partial) = partial {
            remove_partial(partial).await;
        }
        remove_job_dir(&self.config.pipeline.download_dir, id).await;
    }
}

/// Remove a partial download and the engine's control file next to it
async fn remove_partial(path: &Path) {
    let mut control = path.as_os_str().to_owned();
    control.push(".aria2");

    for file in [path.to_path_buf(), PathBuf::from(control)] {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => tracing::debug!(path = %file.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "Failed to remove partial download")
            }
        }
    }
}
