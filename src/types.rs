//! Core types for media-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Create a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for i64 {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// sqlx Type, Encode, and Decode so JobId can be bound and selected directly
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job status
///
/// `pending → fetching → fetched → delivering → delivered` is the success path.
/// `failed` and `cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for the fetch stage
    Pending,
    /// Claimed by the fetch stage
    Fetching,
    /// Artifact on disk, waiting for delivery
    Fetched,
    /// Claimed by the delivery stage
    Delivering,
    /// Delivered to the destination
    Delivered,
    /// Failed with error
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl Status {
    /// All statuses, in lifecycle order
    pub const ALL: [Status; 7] = [
        Status::Pending,
        Status::Fetching,
        Status::Fetched,
        Status::Delivering,
        Status::Delivered,
        Status::Failed,
        Status::Cancelled,
    ];

    /// Name stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Fetching => "fetching",
            Status::Fetched => "fetched",
            Status::Delivering => "delivering",
            Status::Delivered => "delivered",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status name; unknown values map to `Failed`
    pub fn from_db(value: &str) -> Self {
        match value {
            "pending" => Status::Pending,
            "fetching" => Status::Fetching,
            "fetched" => Status::Fetched,
            "delivering" => Status::Delivering,
            "delivered" => Status::Delivered,
            "cancelled" => Status::Cancelled,
            _ => Status::Failed,
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Delivered | Status::Failed | Status::Cancelled
        )
    }

    /// Whether a stage currently owns the job
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Fetching | Status::Delivering)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acquisition strategy chosen by the classifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Magnet link handed to the fetch engine as-is
    Torrent,
    /// Plain file URL
    DirectFile,
    /// Page supported by the media extraction tool
    ExtractableMedia,
    /// Page that must be rendered to find the video stream
    BrowserDiscovered,
}

impl Strategy {
    /// Name stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Torrent => "torrent",
            Strategy::DirectFile => "direct_file",
            Strategy::ExtractableMedia => "extractable_media",
            Strategy::BrowserDiscovered => "browser_discovered",
        }
    }

    /// Parse a stored strategy name
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "torrent" => Some(Strategy::Torrent),
            "direct_file" => Some(Strategy::DirectFile),
            "extractable_media" => Some(Strategy::ExtractableMedia),
            "browser_discovered" => Some(Strategy::BrowserDiscovered),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage, used to tag failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Classification
    Classify,
    /// Descriptor extraction
    Extract,
    /// Byte transfer through the fetch engine
    Fetch,
    /// Upload to the destination
    Deliver,
}

/// Options for enqueueing a job
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Display title (replaced by the extractor's title when absent)
    #[serde(default)]
    pub title: Option<String>,

    /// Scheduling priority, higher runs first (default: 0)
    #[serde(default)]
    pub priority: i32,
}

/// Job as seen by callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID
    pub id: JobId,
    /// Submitted URL or magnet
    pub source_ref: String,
    /// Chosen strategy, once classified
    pub strategy: Option<Strategy>,
    /// Current status
    pub status: Status,
    /// Percent complete for the current phase (0-100)
    pub progress: u8,
    /// Current download rate in bytes per second
    pub transfer_rate_in: Option<u64>,
    /// Current upload rate in bytes per second
    pub transfer_rate_out: Option<u64>,
    /// Estimated seconds remaining for the current phase
    pub eta_seconds: Option<u64>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Scheduling priority
    pub priority: i32,
    /// Skipped by the scheduler while true
    pub paused: bool,
    /// Why the job was paused
    pub pause_reason: Option<String>,
    /// Set once the user cancels
    pub cancel_requested: bool,
    /// Display title
    pub title: Option<String>,
    /// Size announced by the extractor
    pub expected_size: Option<u64>,
    /// Fetched file on disk
    pub artifact_path: Option<PathBuf>,
    /// Size of the fetched file
    pub artifact_size: Option<u64>,
    /// Handle returned by the delivery backend
    pub delivery_ref: Option<String>,
    /// Channel that accepted the delivery
    pub delivery_channel: Option<String>,
    /// Failed delivery attempts
    pub delivery_attempts: u32,
    /// Destination for delivery and notifications
    pub owner_channel: String,
    /// Last error message
    pub error_message: Option<String>,
    /// Creation time (unix millis)
    pub created_at: i64,
    /// Last mutation time (unix millis)
    pub updated_at: i64,
}

/// Count of jobs per status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Jobs waiting to be fetched
    pub pending: u64,
    /// Jobs being fetched
    pub fetching: u64,
    /// Jobs waiting for delivery
    pub fetched: u64,
    /// Jobs being delivered
    pub delivering: u64,
    /// Delivered jobs
    pub delivered: u64,
    /// Failed jobs
    pub failed: u64,
    /// Cancelled jobs
    pub cancelled: u64,
    /// Pending jobs that are paused
    pub paused: u64,
}

impl QueueSummary {
    /// Jobs that still need work
    pub fn in_progress(&self) -> u64 {
        self.pending + self.fetching + self.fetched + self.delivering
    }
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted into the queue
    Queued {
        /// Job ID
        id: JobId,
        /// Submitted URL
        source_ref: String,
    },

    /// Strategy chosen for this attempt
    Classified {
        /// Job ID
        id: JobId,
        /// Chosen strategy
        strategy: Strategy,
    },

    /// Descriptor resolved and handed to the fetch engine
    FetchStarted {
        /// Job ID
        id: JobId,
        /// Display title
        title: String,
    },

    /// Fetch progress tick
    Fetching {
        /// Job ID
        id: JobId,
        /// Percent complete
        percent: u8,
        /// Download rate in bytes per second
        rate_bps: u64,
        /// Estimated seconds remaining
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },

    /// Artifact is on disk
    Fetched {
        /// Job ID
        id: JobId,
        /// Artifact location
        path: PathBuf,
        /// Artifact size in bytes
        size: u64,
    },

    /// Delivery progress tick
    Delivering {
        /// Job ID
        id: JobId,
        /// Percent complete
        percent: u8,
        /// Upload rate in bytes per second
        rate_bps: u64,
        /// Estimated seconds remaining
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },

    /// Delivered to the destination
    Delivered {
        /// Job ID
        id: JobId,
        /// Handle returned by the backend
        delivery_ref: String,
        /// Channel that accepted the upload
        channel: String,
    },

    /// Attempt failed and will be retried after a delay
    RetryScheduled {
        /// Job ID
        id: JobId,
        /// Failed attempts so far
        attempt: u32,
        /// Seconds until the job is eligible again
        delay_secs: u64,
        /// Error of the failed attempt
        error: String,
    },

    /// Job failed permanently
    Failed {
        /// Job ID
        id: JobId,
        /// Stage that failed
        stage: Stage,
        /// Error message
        error: String,
    },

    /// Job paused
    Paused {
        /// Job ID
        id: JobId,
    },

    /// Job resumed
    Resumed {
        /// Job ID
        id: JobId,
    },

    /// Job cancelled
    Cancelled {
        /// Job ID
        id: JobId,
    },

    /// Job deleted
    Removed {
        /// Job ID
        id: JobId,
    },

    /// Job priority changed
    Reordered {
        /// Job ID
        id: JobId,
        /// New priority
        priority: i32,
    },

    /// Downloader is shutting down
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_names_are_stable() {
        for status in Status::ALL {
            assert_eq!(Status::from_db(status.as_str()), status);
        }
        assert_eq!(Status::from_db("garbage"), Status::Failed);
    }

    #[test]
    fn test_terminal_and_active_statuses() {
        assert!(Status::Delivered.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Fetched.is_terminal());
        assert!(Status::Fetching.is_active());
        assert!(Status::Delivering.is_active());
        assert!(!Status::Pending.is_active());
    }

    #[test]
    fn test_strategy_db_names() {
        assert_eq!(
            Strategy::from_db("extractable_media"),
            Some(Strategy::ExtractableMedia)
        );
        assert_eq!(Strategy::from_db("ftp"), None);
        assert_eq!(Strategy::BrowserDiscovered.to_string(), "browser_discovered");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::Reordered {
            id: JobId(7),
            priority: 999,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reordered");
        assert_eq!(json["id"], 7);
        assert_eq!(json["priority"], 999);
    }
}
