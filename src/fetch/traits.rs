//! Traits and types for fetch engines

use crate::error::Result;
use crate::extract::Descriptor;
use crate::types::{JobId, Strategy};
use crate::utils::job_dir;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Everything an engine needs to start a transfer
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Job being fetched
    pub job_id: JobId,
    /// Strategy the descriptor came from
    pub strategy: Strategy,
    /// Resolved resource
    pub descriptor: Descriptor,
    /// Directory the engine writes into
    pub output_dir: PathBuf,
    /// Output file name; `None` lets the engine name torrent content itself
    pub output_name: Option<String>,
}

impl FetchRequest {
    /// Build a request with the deterministic output location for this job
    ///
    /// Non-torrent artifacts are named `job-<id>-<title>.<ext>`, so a retried
    /// attempt overwrites its own partial file instead of leaving a duplicate.
    /// Torrents keep the names from their metadata and land in the job's own
    /// directory, `<output_dir>/job-<id>/`, which is deleted as a whole.
    pub fn new(
        job_id: JobId,
        strategy: Strategy,
        descriptor: Descriptor,
        output_dir: PathBuf,
    ) -> Self {
        if strategy == Strategy::Torrent {
            return Self {
                job_id,
                strategy,
                descriptor,
                output_dir: job_dir(&output_dir, job_id),
                output_name: None,
            };
        }

        let ext = descriptor.extension().unwrap_or_else(|| "bin".to_string());
        let output_name = Some(format!("job-{}-{}.{}", job_id, descriptor.title, ext));

        Self {
            job_id,
            strategy,
            descriptor,
            output_dir,
            output_name,
        }
    }

    /// Where the artifact lands if the engine honours `output_name`
    pub fn expected_path(&self) -> Option<PathBuf> {
        self.output_name
            .as_ref()
            .map(|name| self.output_dir.join(name))
    }
}

/// Engine-side identifier of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub String);

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-native transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Transferring
    Active,
    /// Queued inside the engine
    Waiting,
    /// Paused inside the engine
    Paused,
    /// Finished successfully
    Complete,
    /// Failed
    Error,
    /// Removed from the engine
    Removed,
}

impl EngineState {
    /// Parse the engine's status string; unknown values count as still waiting
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => EngineState::Active,
            "paused" => EngineState::Paused,
            "complete" => EngineState::Complete,
            "error" => EngineState::Error,
            "removed" => EngineState::Removed,
            _ => EngineState::Waiting,
        }
    }

    /// Whether polling can stop
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Complete | EngineState::Error | EngineState::Removed
        )
    }
}

/// A file the engine wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFile {
    /// Path as reported by the engine (absolute or relative)
    pub path: PathBuf,
    /// Length in bytes
    pub length: u64,
}

/// One poll of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Current state
    pub state: EngineState,
    /// Bytes transferred
    pub completed: u64,
    /// Total bytes (0 while unknown)
    pub total: u64,
    /// Download rate in bytes per second
    pub download_rate: u64,
    /// Upload rate in bytes per second
    pub upload_rate: u64,
    /// Files written by the transfer
    pub files: Vec<EngineFile>,
    /// Engine's idea of the output directory
    pub dir: Option<PathBuf>,
    /// Engine error text on failure
    pub error_message: Option<String>,
    /// Transfers spawned by this one (magnet metadata leads to the real download)
    pub followed_by: Vec<EngineHandle>,
}

impl EngineStatus {
    /// Status with only a state set
    pub fn new(state: EngineState) -> Self {
        Self {
            state,
            completed: 0,
            total: 0,
            download_rate: 0,
            upload_rate: 0,
            files: Vec::new(),
            dir: None,
            error_message: None,
            followed_by: Vec::new(),
        }
    }

    /// Percent complete, 0 while the total is unknown
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = self.completed.saturating_mul(100) / self.total;
        percent.min(100) as u8
    }

    /// Seconds remaining at the current rate
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.total == 0 || self.download_rate == 0 {
            return None;
        }
        Some(self.total.saturating_sub(self.completed) / self.download_rate)
    }
}

/// A multi-connection transfer service
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Start a transfer
    async fn submit(&self, request: &FetchRequest) -> Result<EngineHandle>;

    /// Current state of a transfer
    async fn poll(&self, handle: &EngineHandle) -> Result<EngineStatus>;

    /// Stop a transfer
    async fn cancel(&self, handle: &EngineHandle) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Resolve the artifact path of a completed transfer
///
/// Tries, in order: the engine's path when absolute; `download_dir` joined with the
/// basename of the engine's path; the precomputed `expected` path. Multi-file
/// transfers use their largest file. Returns the first candidate that exists.
pub fn resolve_artifact_path(
    status: &EngineStatus,
    download_dir: &Path,
    expected: Option<&Path>,
) -> Option<PathBuf> {
    let reported = status.files.iter().max_by_key(|f| f.length).map(|f| &f.path);

    let mut candidates: Vec<PathBuf> = Vec::with_capacity(3);
    if let Some(path) = reported {
        if path.is_absolute() {
            candidates.push(path.clone());
        }
        if let Some(name) = path.file_name() {
            candidates.push(download_dir.join(name));
        }
    }
    if let Some(expected) = expected {
        candidates.push(expected.to_path_buf());
    }

    candidates.into_iter().find(|p| p.is_file())
}
