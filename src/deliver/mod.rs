//! Delivery Adapter
//!
//! Finished artifacts are uploaded to the job's owner through one or more
//! [`DeliveryChannel`]s. Channels are tried in order: the high-capacity channel
//! (self-hosted Bot API server, no ceiling) first, then the low-capacity public API.
//! A channel whose ceiling is below the file size is skipped without a request.
//!
//! Progress flows through a [`ProgressSink`]; [`ThrottledProgress`] rate-limits it
//! and computes rate and ETA for the job row.

mod bot_api;
mod progress;
mod traits;

pub use bot_api::BotApiChannel;
pub use progress::ThrottledProgress;
pub use traits::{DeliveryChannel, DeliveryRef, NoProgress, ProgressSink};

use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Name recorded for the self-hosted channel
pub const HIGH_CAPACITY: &str = "high_capacity";
/// Name recorded for the public channel
pub const LOW_CAPACITY: &str = "low_capacity";

/// A successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Handle returned by the channel
    pub reference: DeliveryRef,
    /// Channel that accepted the file
    pub channel: String,
}

/// Ordered set of channels with fallback
#[derive(Clone, Default)]
pub struct Deliverer {
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl Deliverer {
    /// Try `channels` in the given order
    pub fn new(channels: Vec<Arc<dyn DeliveryChannel>>) -> Self {
        Self { channels }
    }

    /// Build the high then low capacity Bot API channels that are configured
    pub fn from_config(config: &DeliveryConfig, client: reqwest::Client) -> Self {
        let mut channels: Vec<Arc<dyn DeliveryChannel>> = Vec::new();
        if let Some(high) = &config.high_capacity {
            channels.push(Arc::new(BotApiChannel::new(
                HIGH_CAPACITY,
                high.clone(),
                client.clone(),
            )));
        }
        if let Some(low) = &config.low_capacity {
            channels.push(Arc::new(BotApiChannel::new(LOW_CAPACITY, low.clone(), client)));
        }
        Self::new(channels)
    }

    /// Whether no channel is configured
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel names in the order they are tried
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver `path` to `destination` through the first channel that accepts it
    ///
    /// Returns [`Error::ArtifactMissing`] when the file is gone, and
    /// [`Error::Delivery`] listing every channel's failure when none succeeded.
    pub async fn deliver(
        &self,
        path: &Path,
        destination: &str,
        caption: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<Delivered> {
        if self.channels.is_empty() {
            return Err(Error::NotSupported(
                "no delivery channel configured".to_string(),
            ));
        }

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(Error::ArtifactMissing(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ArtifactMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut failures = Vec::new();
        for channel in &self.channels {
            if let Some(limit) = channel.max_upload_bytes()
                && size > limit
            {
                tracing::info!(
                    channel = channel.name(),
                    size,
                    limit,
                    "Artifact exceeds channel ceiling, skipping"
                );
                failures.push(format!(
                    "{}: {} bytes exceeds ceiling of {} bytes",
                    channel.name(),
                    size,
                    limit
                ));
                continue;
            }

            match channel.send(path, destination, caption, progress).await {
                Ok(reference) => {
                    return Ok(Delivered {
                        reference,
                        channel: channel.name().to_string(),
                    });
                }
                Err(Error::ArtifactMissing(p)) => return Err(Error::ArtifactMissing(p)),
                Err(e) => {
                    tracing::warn!(
                        channel = channel.name(),
                        error = %e,
                        "Delivery channel failed, trying next"
                    );
                    failures.push(format!("{}: {}", channel.name(), e));
                }
            }
        }

        Err(Error::Delivery(failures.join("; ")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeChannel {
        name: &'static str,
        ceiling: Option<u64>,
        fail_with: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn new(name: &'static str, ceiling: Option<u64>, fail_with: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                ceiling,
                fail_with,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeliveryChannel for FakeChannel {
        async fn send(
            &self,
            _path: &Path,
            destination: &str,
            _caption: Option<&str>,
            progress: &mut dyn ProgressSink,
        ) -> Result<DeliveryRef> {
            self.calls.lock().unwrap().push(destination.to_string());
            if let Some(message) = self.fail_with {
                return Err(Error::Delivery(message.to_string()));
            }
            progress.report(1, 1);
            Ok(DeliveryRef(format!("{}-ref", self.name)))
        }

        fn name(&self) -> &str {
            self.name
        }

        fn max_upload_bytes(&self) -> Option<u64> {
            self.ceiling
        }
    }

    fn both(high: &Arc<FakeChannel>, low: &Arc<FakeChannel>) -> Deliverer {
        let high: Arc<dyn DeliveryChannel> = high.clone();
        let low: Arc<dyn DeliveryChannel> = low.clone();
        Deliverer::new(vec![high, low])
    }

    async fn artifact(size: usize) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp4");
        tokio::fs::write(&path, vec![0u8; size]).await.unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_high_capacity_used_first() {
        let high = FakeChannel::new(HIGH_CAPACITY, None, None);
        let low = FakeChannel::new(LOW_CAPACITY, Some(100), None);
        let deliverer = both(&high, &low);
        let (_dir, path) = artifact(10).await;

        let delivered = deliverer.deliver(&path, "me", None, &mut NoProgress).await.unwrap();
        assert_eq!(delivered.channel, HIGH_CAPACITY);
        assert_eq!(delivered.reference.0, "high_capacity-ref");
        assert_eq!(low.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_high_capacity_fails() {
        let high = FakeChannel::new(HIGH_CAPACITY, None, Some("server unreachable"));
        let low = FakeChannel::new(LOW_CAPACITY, Some(100), None);
        let deliverer = both(&high, &low);
        let (_dir, path) = artifact(10).await;

        let delivered = deliverer.deliver(&path, "me", None, &mut NoProgress).await.unwrap();
        assert_eq!(delivered.channel, LOW_CAPACITY);
        assert_eq!(high.calls(), 1);
        assert_eq!(low.calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_file_skips_low_capacity() {
        let high = FakeChannel::new(HIGH_CAPACITY, None, Some("server unreachable"));
        let low = FakeChannel::new(LOW_CAPACITY, Some(100), None);
        let deliverer = both(&high, &low);
        let (_dir, path) = artifact(500).await;

        let err = deliverer.deliver(&path, "me", None, &mut NoProgress).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("server unreachable"), "{}", message);
        assert!(message.contains("exceeds ceiling"), "{}", message);
        assert_eq!(low.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported() {
        let high = FakeChannel::new(HIGH_CAPACITY, None, None);
        let deliverer = Deliverer::new(vec![high.clone() as Arc<dyn DeliveryChannel>]);
        let err = deliverer
            .deliver(Path::new("/nonexistent/a.mp4"), "me", None, &mut NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing(_)));
        assert_eq!(high.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_channels() {
        let deliverer = Deliverer::default();
        assert!(deliverer.is_empty());
        let (_dir, path) = artifact(1).await;
        let err = deliverer.deliver(&path, "me", None, &mut NoProgress).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn test_from_config_orders_channels() {
        let config = DeliveryConfig {
            high_capacity: Some(crate::config::BotApiConfig::local("http://localhost:8081", "t")),
            low_capacity: Some(crate::config::BotApiConfig::public("t")),
            ..Default::default()
        };
        let deliverer = Deliverer::from_config(&config, reqwest::Client::new());
        assert_eq!(deliverer.channel_names(), vec![HIGH_CAPACITY, LOW_CAPACITY]);
    }
}
