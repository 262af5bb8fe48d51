//! Shared test helpers for building a MediaDownloader over in-memory collaborators.

use crate::classifier::{Classifier, SupportedSites};
use crate::config::Config;
use crate::deliver::{Deliverer, DeliveryChannel, DeliveryRef, HIGH_CAPACITY, LOW_CAPACITY, ProgressSink};
use crate::downloader::{Components, MediaDownloader};
use crate::error::{Error, Result};
use crate::extract::{Descriptor, Extractor, ExtractorRegistry, check_size_limit};
use crate::fetch::testing::ScriptedEngine;
use crate::types::{Event, JobId, Status, Strategy};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// What one extraction returns
#[derive(Debug, Clone)]
pub(crate) enum Extraction {
    /// Descriptor for the URL with this announced size
    Sized(Option<u64>),
    /// `Error::Extraction` with this message
    Fail(&'static str),
}

/// Extractor returning scripted results, one per call (the last repeats)
pub(crate) struct ScriptedExtractor {
    strategy: Strategy,
    max_file_size: u64,
    script: Mutex<VecDeque<Extraction>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub(crate) fn new(strategy: Strategy, max_file_size: u64) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            max_file_size,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push(&self, step: Extraction) {
        self.script.lock().unwrap().push_back(step);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, url: &str, _id: JobId) -> Result<Descriptor> {
        self.calls.lock().unwrap().push(url.to_string());
        let step = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };

        match step.unwrap_or(Extraction::Sized(Some(1024))) {
            Extraction::Sized(size) => {
                check_size_limit(size, self.max_file_size)?;
                let mut descriptor = Descriptor::bare(url, "Test Clip");
                descriptor.expected_size = size;
                descriptor.filename = Some("clip.mp4".to_string());
                Ok(descriptor)
            }
            Extraction::Fail(message) => Err(Error::Extraction(message.to_string())),
        }
    }

    fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Delivery channel that records uploads and can be told to fail
pub(crate) struct RecordingChannel {
    name: &'static str,
    ceiling: Option<u64>,
    failing: Mutex<bool>,
    hold: Mutex<Option<Duration>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    pub(crate) fn new(name: &'static str, ceiling: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            name,
            ceiling,
            failing: Mutex::new(false),
            hold: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Make each upload take `duration`
    pub(crate) fn set_hold(&self, duration: Duration) {
        *self.hold.lock().unwrap() = Some(duration);
    }

    /// (destination, file name) of every successful upload
    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(
        &self,
        path: &Path,
        destination: &str,
        _caption: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<DeliveryRef> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::ArtifactMissing(path.to_path_buf()))?
            .len();

        let hold = *self.hold.lock().unwrap();
        if let Some(hold) = hold {
            progress.report(size / 2, size);
            tokio::time::sleep(hold).await;
        }

        if *self.failing.lock().unwrap() {
            return Err(Error::Delivery(format!("{} unavailable", self.name)));
        }

        progress.report(size, size);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), file_name));
        Ok(DeliveryRef(format!("{}-file-id", self.name)))
    }

    fn name(&self) -> &str {
        self.name
    }

    fn max_upload_bytes(&self) -> Option<u64> {
        self.ceiling
    }
}

/// A downloader wired to scripted collaborators
pub(crate) struct Harness {
    pub(crate) downloader: MediaDownloader,
    pub(crate) engine: Arc<ScriptedEngine>,
    pub(crate) extractor: Arc<ScriptedExtractor>,
    pub(crate) high: Arc<RecordingChannel>,
    pub(crate) low: Arc<RecordingChannel>,
    pub(crate) config: Config,
    pub(crate) temp_dir: TempDir,
}

/// Configuration with short intervals, rooted in `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("jobs.db");
    config.pipeline.download_dir = dir.join("downloads");
    config.pipeline.poll_interval = Duration::from_millis(10);
    config.pipeline.error_backoff = Duration::from_millis(10);
    config.pipeline.shutdown_timeout = Duration::from_secs(5);
    config.pipeline.max_file_size = 2 * 1024 * 1024 * 1024;
    config.engine.poll_interval = Duration::from_millis(5);
    config.retry.base_delay = Duration::from_millis(20);
    config.delivery.retry_delay = Duration::from_millis(10);
    config.delivery.progress_interval = Duration::from_millis(1);
    config.classifier.fetch_supported_sites = false;
    config
}

impl Harness {
    /// Build a harness; the stage loops are not started
    pub(crate) async fn new() -> Self {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path());
        Self::with_config(config, temp_dir).await
    }

    pub(crate) async fn with_config(config: Config, temp_dir: TempDir) -> Self {
        let engine = Arc::new(ScriptedEngine::new());
        let extractor = ScriptedExtractor::new(Strategy::DirectFile, config.pipeline.max_file_size);
        let high = RecordingChannel::new(HIGH_CAPACITY, None);
        let low = RecordingChannel::new(LOW_CAPACITY, Some(50 * 1024 * 1024));

        let mut extractors = ExtractorRegistry::new();
        extractors.register(extractor.clone());
        extractors.register(Arc::new(crate::extract::TorrentExtractor));

        let high_channel: Arc<dyn DeliveryChannel> = high.clone();
        let low_channel: Arc<dyn DeliveryChannel> = low.clone();
        let components = Components {
            classifier: Arc::new(Classifier::with_sites(
                config.classifier.clone(),
                SupportedSites::default(),
            )),
            extractors,
            engine: engine.clone(),
            deliverer: Deliverer::new(vec![high_channel, low_channel]),
        };

        let downloader = MediaDownloader::with_components(config.clone(), components)
            .await
            .unwrap();

        Self {
            downloader,
            engine,
            extractor,
            high,
            low,
            config,
            temp_dir,
        }
    }

    /// Enqueue a direct-file URL for owner "owner-1"
    pub(crate) async fn enqueue(&self, name: &str) -> JobId {
        self.downloader
            .enqueue(
                &format!("https://files.example.com/media/{}.mp4", name),
                "owner-1",
                Default::default(),
            )
            .await
            .unwrap()
    }

    pub(crate) async fn status(&self, id: JobId) -> Status {
        self.downloader.db.get_job(id).await.unwrap().unwrap().status
    }
}

/// Poll until the job reaches `status`, failing after `timeout`
pub(crate) async fn wait_for_status(
    downloader: &MediaDownloader,
    id: JobId,
    status: Status,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = downloader.db.get_job(id).await.unwrap().unwrap();
        if job.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} waiting for {} (error: {:?})",
            id,
            job.status,
            status,
            job.error_message
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drain the events received so far
pub(crate) fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
