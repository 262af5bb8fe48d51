//! Waiting helpers for integration tests

use media_dl::{Event, JobId, MediaDownloader, Status};
use std::time::Duration;

/// How a job ended
#[derive(Debug, PartialEq)]
pub enum WaitResult {
    /// Delivered with this reference
    Delivered(String),
    /// Failed with this error
    Failed(String),
    /// No terminal event before the timeout
    Timeout,
    /// Event channel closed
    ChannelClosed,
}

/// Wait for a job's Delivered or Failed event
///
/// Subscribe before the job can finish, or the event is missed.
pub async fn wait_for_outcome(
    mut events: tokio::sync::broadcast::Receiver<Event>,
    id: JobId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Delivered {
                    id: event_id,
                    delivery_ref,
                    ..
                }) if event_id == id => return WaitResult::Delivered(delivery_ref),
                Ok(Event::Failed {
                    id: event_id,
                    error,
                    ..
                }) if event_id == id => return WaitResult::Failed(error),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Assert the stored status of a job
pub async fn assert_job_status(downloader: &MediaDownloader, id: JobId, expected: Status) {
    let job = downloader
        .get_job(id)
        .await
        .expect("job store readable")
        .expect("job exists");
    assert_eq!(
        job.status, expected,
        "job {} is {} (error: {:?})",
        id, job.status, job.error_message
    );
}
