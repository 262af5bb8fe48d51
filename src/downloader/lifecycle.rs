//! Startup recovery, start and graceful shutdown.

use crate::db::Database;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{MediaDownloader, StageSlot};

/// How long to wait for a fetch to settle after its token was cancelled
const CANCEL_GRACE: Duration = Duration::from_secs(10);

impl MediaDownloader {
    /// Put jobs left active by a previous process back where a stage can claim them
    pub(crate) async fn recover(db: &Database) -> Result<()> {
        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly, recovering jobs");
        }

        let (fetches, deliveries) = db.recover_interrupted().await?;
        if fetches > 0 || deliveries > 0 {
            tracing::info!(
                requeued_fetches = fetches,
                requeued_deliveries = deliveries,
                "Recovered interrupted jobs"
            );
        }

        db.set_clean_start().await?;
        Ok(())
    }

    /// Spawn the fetch and delivery loops
    ///
    /// Calling `start` more than once has no effect. The delivery loop is not started
    /// when no delivery channel is configured; fetched jobs then wait in `fetched`.
    pub async fn start(&self) -> Result<()> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut tasks = self.state.tasks.lock().await;
        tasks.push(self.start_fetch_loop());

        if self.components.deliverer.is_empty() {
            tracing::warn!("No delivery channel configured, fetched jobs will not be delivered");
        } else {
            tasks.push(self.start_delivery_loop());
        }

        tracing::info!(
            poll_interval_ms = self.config.pipeline.poll_interval.as_millis() as u64,
            "Pipeline started"
        );
        Ok(())
    }

    /// Gracefully shut down the pipeline
    ///
    /// 1. Stop accepting new jobs and stop claiming queued ones
    /// 2. Wait up to `shutdown_timeout` for the active fetch, then cancel it; the job
    ///    returns to `pending` and is picked up on the next start
    /// 3. Wait for the active upload without a timeout
    /// 4. Mark a clean shutdown and emit [`Event::Shutdown`]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.state.accepting_new.store(false, Ordering::SeqCst);
        self.state.shutdown.cancel();
        tracing::info!("Stopped accepting new jobs");

        let timeout = self.config.pipeline.shutdown_timeout;
        if tokio::time::timeout(timeout, wait_for_idle(&self.state.fetch_slot))
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for active fetch, cancelling it"
            );
            if let Some(active) = self.state.fetch_slot.lock().await.as_ref() {
                active.token.cancel();
            }
            if tokio::time::timeout(CANCEL_GRACE, wait_for_idle(&self.state.fetch_slot))
                .await
                .is_err()
            {
                tracing::warn!("Active fetch did not stop, leaving it for recovery");
            }
        }

        if let Some(id) = self.active_delivery().await {
            tracing::info!(job_id = id.0, "Waiting for active delivery to finish");
        }
        wait_for_idle(&self.state.delivery_slot).await;

        let tasks: Vec<_> = self.state.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            match tokio::time::timeout(CANCEL_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Stage loop ended abnormally"),
                Err(_) => {
                    tracing::warn!("Stage loop did not stop, aborting it");
                    task.abort();
                }
            }
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait until no job holds `slot`
async fn wait_for_idle(slot: &StageSlot) {
    loop {
        if slot.lock().await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
