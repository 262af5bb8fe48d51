//! Pipeline runner split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Submission and read views
//! - [`control`] - Pause, resume, cancel, reorder and remove
//! - [`fetch_stage`] - Classify, extract and fetch loop
//! - [`delivery_stage`] - Upload loop
//! - [`lifecycle`] - Startup recovery, start and graceful shutdown

mod control;
mod delivery_stage;
mod fetch_stage;
mod lifecycle;
mod queue;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::db::Database;
use crate::deliver::Deliverer;
use crate::error::{Error, Result};
use crate::extract::ExtractorRegistry;
use crate::fetch::{Aria2Engine, FetchEngine};
use crate::retry::RetryPolicy;
use crate::types::{Event, JobId};
use crate::utils::{remove_artifact, remove_job_dir};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Job currently owned by a stage, with the token that stops it
#[derive(Debug, Clone)]
pub(crate) struct ActiveJob {
    pub(crate) id: JobId,
    pub(crate) token: CancellationToken,
}

/// Single-slot guard for one stage
///
/// A stage holds the slot from claim to its final status write, so at most one job
/// is fetching and at most one is delivering.
pub(crate) type StageSlot = Arc<Mutex<Option<ActiveJob>>>;

/// Scheduling state shared by the stage loops
#[derive(Clone)]
pub(crate) struct RunnerState {
    /// Job held by the fetch stage
    pub(crate) fetch_slot: StageSlot,
    /// Job held by the delivery stage
    pub(crate) delivery_slot: StageSlot,
    /// Cleared when shutdown begins; loops stop claiming and enqueue is refused
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Wakes idle loops when shutdown begins
    pub(crate) shutdown: CancellationToken,
    /// Set once the loops have been spawned
    pub(crate) started: Arc<AtomicBool>,
    /// Handles of the spawned stage loops
    pub(crate) tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RunnerState {
    fn new() -> Self {
        Self {
            fetch_slot: Arc::new(Mutex::new(None)),
            delivery_slot: Arc::new(Mutex::new(None)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            started: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Collaborators the pipeline drives
///
/// [`MediaDownloader::new`] builds the production set from configuration; tests and
/// embedders can supply their own through [`MediaDownloader::with_components`].
#[derive(Clone)]
pub struct Components {
    /// URL classifier
    pub classifier: Arc<Classifier>,
    /// Extractor per strategy
    pub extractors: ExtractorRegistry,
    /// Byte transfer engine
    pub engine: Arc<dyn FetchEngine>,
    /// Delivery channels in fallback order
    pub deliverer: Deliverer,
}

impl Components {
    /// Production components: aria2 engine, configured extractors and Bot API channels
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("media-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            classifier: Arc::new(Classifier::new(
                config.classifier.clone(),
                client.clone(),
                config.extraction.probe_timeout,
            )),
            extractors: ExtractorRegistry::from_config(config, client.clone()),
            engine: Arc::new(Aria2Engine::new(config.engine.clone(), config.retry.clone())?),
            deliverer: Deliverer::from_config(&config.delivery, client),
        })
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Job store (public for integration tests to inspect job rows)
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Classifier, extractors, engine and channels
    pub(crate) components: Components,
    /// Fetch-stage retry policy
    pub(crate) retry: RetryPolicy,
    /// Stage slots and shutdown flags
    pub(crate) state: RunnerState,
}

impl MediaDownloader {
    /// Create a downloader with production components
    ///
    /// This validates the configuration, creates the download directory, opens the
    /// job store and recovers jobs left active by a previous process. The stage loops
    /// are not running until [`start`](Self::start) is called.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let components = Components::from_config(&config)?;
        Self::with_components(config, components).await
    }

    /// Create a downloader around caller-supplied components
    pub async fn with_components(config: Config, components: Components) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.pipeline.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.pipeline.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        Self::recover(&db).await?;

        // Buffer of 1000 events; slow subscribers get RecvError::Lagged
        let (event_tx, _rx) = broadcast::channel(1000);

        let retry = RetryPolicy::new(config.retry.clone(), Arc::clone(&db), event_tx.clone());

        tracing::info!(
            download_dir = %config.pipeline.download_dir.display(),
            engine = components.engine.name(),
            channels = ?components.deliverer.channel_names(),
            "Downloader initialized"
        );

        Ok(Self {
            db,
            event_tx,
            config: Arc::new(config),
            components,
            retry,
            state: RunnerState::new(),
        })
    }

    /// Subscribe to job events
    ///
    /// Each subscriber receives every event independently. A subscriber that falls
    /// more than 1000 events behind receives `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, MediaDownloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "job event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers; dropped when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Delete a job's artifact and its working directory, best effort
    pub(crate) async fn discard_files(&self, id: JobId, artifact: Option<&Path>) {
        let root = &self.config.pipeline.download_dir;
        if let Some(path) = artifact {
            remove_artifact(path, root).await;
        }
        remove_job_dir(root, id).await;
    }

    /// Id of the job held by the fetch stage, if any
    pub async fn active_fetch(&self) -> Option<JobId> {
        self.state.fetch_slot.lock().await.as_ref().map(|a| a.id)
    }

    /// Id of the job held by the delivery stage, if any
    pub async fn active_delivery(&self) -> Option<JobId> {
        self.state.delivery_slot.lock().await.as_ref().map(|a| a.id)
    }
}
