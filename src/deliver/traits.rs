//! Traits and types for delivery channels

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Receives upload progress from a channel
///
/// Channels call [`report`](ProgressSink::report) as often as they like; the sink is
/// responsible for any rate limiting.
pub trait ProgressSink: Send {
    /// `current` of `total` bytes have been sent
    fn report(&mut self, current: u64, total: u64);
}

/// Sink that drops every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _current: u64, _total: u64) {}
}

/// Externally visible handle of a delivered file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryRef(pub String);

impl std::fmt::Display for DeliveryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A backend that can transmit a finished artifact
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send the file at `path` to `destination`
    async fn send(
        &self,
        path: &Path,
        destination: &str,
        caption: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<DeliveryRef>;

    /// Name recorded on the job when this channel succeeds
    fn name(&self) -> &str;

    /// Largest accepted file, `None` when unlimited
    fn max_upload_bytes(&self) -> Option<u64>;
}
