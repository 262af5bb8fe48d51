//! Drive one transfer from submission to a resolved artifact

use super::traits::{EngineHandle, EngineState, FetchEngine, FetchRequest, resolve_artifact_path};
use crate::db::{Database, ProgressUpdate};
use crate::error::{Error, Result};
use crate::types::{Event, JobId};
use crate::utils::ensure_free_space;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Poll failures in a row before the transfer is given up
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// A finished transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// File on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Submits a request and polls the engine until a terminal state
///
/// Each tick writes progress to the job row, emits [`Event::Fetching`], and checks
/// both the in-process cancellation token and the persisted cancel flag. A cancelled
/// transfer is removed from the engine and reported as [`Error::Cancelled`]. Job
/// store errors during polling are logged and the transfer carries on.
pub struct FetchMonitor<'a> {
    /// Engine performing the transfer
    pub engine: &'a dyn FetchEngine,
    /// Job store for progress writes and cancel checks
    pub db: &'a Database,
    /// Event channel
    pub event_tx: &'a broadcast::Sender<Event>,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Largest accepted transfer in bytes
    pub max_file_size: u64,
    /// Free space required before submitting (0 = no check)
    pub min_free_space: u64,
    /// Download root, checked for free space before submitting
    pub download_dir: &'a Path,
}

impl FetchMonitor<'_> {
    /// Run the transfer to completion
    pub async fn run(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact> {
        let id = request.job_id;

        ensure_free_space(self.download_dir, self.min_free_space)?;

        let mut handle = self.engine.submit(request).await?;
        let mut poll_errors = 0u32;

        loop {
            if cancel.is_cancelled() || self.cancel_requested(id).await {
                self.stop(id, &handle).await;
                return Err(Error::Cancelled);
            }

            let status = match self.engine.poll(&handle).await {
                Ok(status) => {
                    poll_errors = 0;
                    status
                }
                Err(e) => {
                    poll_errors += 1;
                    if poll_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        self.stop(id, &handle).await;
                        return Err(e);
                    }
                    tracing::warn!(job_id = id.0, gid = %handle, error = %e, "Engine poll failed");
                    self.wait(cancel).await;
                    continue;
                }
            };

            match status.state {
                EngineState::Complete => {
                    if let Some(next) = status.followed_by.first() {
                        tracing::info!(
                            job_id = id.0,
                            from = %handle,
                            to = %next,
                            "Following metadata transfer to content transfer"
                        );
                        handle = next.clone();
                        continue;
                    }

                    let expected = request.expected_path();
                    let path = resolve_artifact_path(&status, &request.output_dir, expected.as_deref())
                        .ok_or_else(|| {
                            Error::Transfer(format!(
                                "transfer complete but file not found (engine reported {:?})",
                                status.files.first().map(|f| &f.path)
                            ))
                        })?;
                    let size = tokio::fs::metadata(&path).await?.len();

                    tracing::info!(job_id = id.0, path = %path.display(), size, "Transfer complete");
                    return Ok(FetchedArtifact { path, size });
                }
                EngineState::Error | EngineState::Removed => {
                    let message = status
                        .error_message
                        .unwrap_or_else(|| format!("transfer {}", state_name(status.state)));
                    return Err(Error::Transfer(message));
                }
                EngineState::Active | EngineState::Waiting | EngineState::Paused => {
                    if status.total > self.max_file_size {
                        self.stop(id, &handle).await;
                        return Err(Error::SizeLimit {
                            size: status.total,
                            limit: self.max_file_size,
                        });
                    }

                    let update = ProgressUpdate {
                        percent: status.percent(),
                        rate_in: Some(status.download_rate),
                        rate_out: Some(status.upload_rate),
                        eta_seconds: status.eta_seconds(),
                    };
                    if let Err(e) = self.db.set_progress(id, update).await {
                        tracing::warn!(job_id = id.0, error = %e, "Failed to record fetch progress");
                    }
                    let _ = self.event_tx.send(Event::Fetching {
                        id,
                        percent: update.percent,
                        rate_bps: status.download_rate,
                        eta_seconds: update.eta_seconds,
                    });
                    tracing::debug!(
                        job_id = id.0,
                        percent = update.percent,
                        rate = status.download_rate,
                        "Fetch progress"
                    );
                }
            }

            self.wait(cancel).await;
        }
    }

    /// Persisted cancel flag; an unreadable store does not stop the transfer
    async fn cancel_requested(&self, id: JobId) -> bool {
        match self.db.is_cancel_requested(id).await {
            Ok(requested) => requested,
            Err(e) => {
                tracing::warn!(job_id = id.0, error = %e, "Failed to read cancel flag");
                false
            }
        }
    }

    async fn wait(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = cancel.cancelled() => {}
        }
    }

    async fn stop(&self, id: JobId, handle: &EngineHandle) {
        if let Err(e) = self.engine.cancel(handle).await {
            tracing::warn!(job_id = id.0, gid = %handle, error = %e, "Failed to cancel engine transfer");
        }
    }
}

fn state_name(state: EngineState) -> &'static str {
    match state {
        EngineState::Removed => "removed",
        EngineState::Error => "failed",
        _ => "stopped",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewJob;
    use crate::extract::Descriptor;
    use crate::fetch::testing::{ScriptedEngine, Step};
    use crate::types::{Status, Strategy};
    use tempfile::TempDir;

    struct Fixture {
        db: Database,
        dir: TempDir,
        events: broadcast::Sender<Event>,
        id: JobId,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("jobs.db")).await.unwrap();
        let id = db
            .insert_job(&NewJob {
                source_ref: "https://example.com/a.mp4".to_string(),
                owner_channel: "o".to_string(),
                title: None,
                priority: 0,
            })
            .await
            .unwrap();
        assert!(db.claim_for_fetch(id).await.unwrap());
        let (events, _) = broadcast::channel(64);
        Fixture { db, dir, events, id }
    }

    fn monitor<'a>(f: &'a Fixture, engine: &'a ScriptedEngine, max: u64) -> FetchMonitor<'a> {
        FetchMonitor {
            engine,
            db: &f.db,
            event_tx: &f.events,
            poll_interval: Duration::from_millis(5),
            max_file_size: max,
            min_free_space: 0,
            download_dir: f.dir.path(),
        }
    }

    fn request(f: &Fixture) -> FetchRequest {
        let mut descriptor = Descriptor::bare("https://example.com/a.mp4", "A");
        descriptor.filename = Some("a.mp4".to_string());
        FetchRequest::new(f.id, Strategy::DirectFile, descriptor, f.dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_progress_then_complete() {
        let f = fixture().await;
        let mut rx = f.events.subscribe();
        let engine = ScriptedEngine::new();
        engine.push_script(vec![
            Step::Progress { completed: 10, total: 100 },
            Step::Progress { completed: 60, total: 100 },
            Step::Complete { size: 100 },
        ]);

        let artifact = monitor(&f, &engine, 1000)
            .run(&request(&f), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.size, 100);
        assert_eq!(artifact.path, f.dir.path().join(format!("job-{}-A.mp4", f.id)));

        let job = f.db.get_job(f.id).await.unwrap().unwrap();
        assert_eq!(job.progress, 60);
        assert_eq!(job.status, Status::Fetching);

        let mut percents = Vec::new();
        while let Ok(Event::Fetching { percent, .. }) = rx.try_recv() {
            percents.push(percent);
        }
        assert_eq!(percents, vec![10, 60]);
    }

    #[tokio::test]
    async fn test_engine_error_is_transfer_error() {
        let f = fixture().await;
        let engine = ScriptedEngine::new();
        engine.push_script(vec![Step::Fail("404 Not Found".to_string())]);

        let err = monitor(&f, &engine, 1000)
            .run(&request(&f), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(ref m) if m == "404 Not Found"));
    }

    #[tokio::test]
    async fn test_size_cap_enforced_once_total_known() {
        let f = fixture().await;
        let engine = ScriptedEngine::new();
        engine.push_script(vec![Step::Progress { completed: 1, total: 5000 }, Step::Hang]);

        let err = monitor(&f, &engine, 1000)
            .run(&request(&f), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SizeLimit { size: 5000, limit: 1000 }));
        assert_eq!(engine.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_persisted_cancel_stops_transfer() {
        let f = fixture().await;
        let engine = ScriptedEngine::new();
        engine.push_script(vec![Step::Hang]);

        let run = monitor(&f, &engine, 1000);
        let req = request(&f);
        let token = CancellationToken::new();
        let (result, _) = tokio::join!(run.run(&req, &token), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            f.db.cancel(f.id).await.unwrap();
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(engine.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_token_cancel_stops_transfer() {
        let f = fixture().await;
        let engine = ScriptedEngine::new();
        engine.push_script(vec![Step::Hang]);

        let token = CancellationToken::new();
        token.cancel();
        let result = monitor(&f, &engine, 1000).run(&request(&f), &token).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(engine.submit_count(), 1);
        assert_eq!(engine.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_space_blocks_submission() {
        let f = fixture().await;
        let engine = ScriptedEngine::new();
        let mut m = monitor(&f, &engine, 1000);
        m.min_free_space = u64::MAX;

        let err = m.run(&request(&f), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientSpace { .. }));
        assert_eq!(engine.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_progress_write_does_not_stop_transfer() {
        let f = fixture().await;
        sqlx::query(
            "CREATE TRIGGER reject_half_progress BEFORE UPDATE OF progress ON jobs \
             WHEN NEW.progress = 50 BEGIN SELECT RAISE(ABORT, 'database is locked'); END",
        )
        .execute(f.db.pool())
        .await
        .unwrap();

        let engine = ScriptedEngine::new();
        engine.push_script(vec![
            Step::Progress { completed: 50, total: 100 },
            Step::Complete { size: 100 },
        ]);

        let artifact = monitor(&f, &engine, 1000)
            .run(&request(&f), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.size, 100);
        assert_eq!(engine.cancel_count(), 0);
        let job = f.db.get_job(f.id).await.unwrap().unwrap();
        assert_eq!(job.progress, 0);
        assert_eq!(job.status, Status::Fetching);
    }
}
