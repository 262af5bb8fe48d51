//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for [`MediaDownloader`](crate::MediaDownloader)
///
/// Every field has a sensible default, so `Config::default()` runs against a local
/// aria2 daemon with no delivery channels configured.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling, directories and limits
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Fetch-stage retry policy and transient RPC retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Fetch engine connection (aria2 JSON-RPC)
    #[serde(default)]
    pub engine: EngineConfig,

    /// URL classification rules
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Extractor tools and filters
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Delivery channels
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.pipeline.download_dir
    }

    /// Check values that would make the pipeline spin or never make progress
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.poll_interval.is_zero() {
            return Err(config_error(
                "poll interval must be greater than zero",
                "pipeline.poll_interval",
            ));
        }
        if self.pipeline.max_file_size == 0 {
            return Err(config_error(
                "max file size must be greater than zero",
                "pipeline.max_file_size",
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(config_error(
                "max retries must be at least 1",
                "retry.max_retries",
            ));
        }
        if self.engine.rpc_url.trim().is_empty() {
            return Err(config_error("RPC URL must not be empty", "engine.rpc_url"));
        }
        if self.engine.poll_interval.is_zero() {
            return Err(config_error(
                "engine poll interval must be greater than zero",
                "engine.poll_interval",
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(config_error(
                "delivery attempts must be at least 1",
                "delivery.max_attempts",
            ));
        }
        for (key, channel) in [
            ("delivery.high_capacity", &self.delivery.high_capacity),
            ("delivery.low_capacity", &self.delivery.low_capacity),
        ] {
            if let Some(channel) = channel
                && channel.token.trim().is_empty()
            {
                return Err(config_error("bot token must not be empty", key));
            }
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Scheduling, directories and limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory the fetch engine writes into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Idle sleep between scheduler checks (default: 1 second)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Sleep after a loop-level error such as an unreachable database (default: 5 seconds)
    #[serde(default = "default_error_backoff", with = "duration_serde")]
    pub error_backoff: Duration,

    /// How long shutdown waits for the active fetch (default: 300 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Largest resource the pipeline accepts, in bytes (default: 2 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Free space required in the download directory before submitting (default: 0 = no check)
    #[serde(default)]
    pub min_free_space: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            poll_interval: default_poll_interval(),
            error_backoff: default_error_backoff(),
            shutdown_timeout: default_shutdown_timeout(),
            max_file_size: default_max_file_size(),
            min_free_space: 0,
        }
    }
}

/// Retry configuration
///
/// `max_retries` and `base_delay` govern whole-job retries in the fetch stage.
/// The remaining fields govern short retries of individual engine RPC calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts before a job is marked failed (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each further failure (default: 60 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Attempts for a single RPC call (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between RPC attempts (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between RPC attempts (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            jitter: false,
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// aria2 JSON-RPC connection and transfer options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSON-RPC endpoint (default: "http://localhost:6800/jsonrpc")
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// RPC secret token (sent as "token:<secret>")
    #[serde(default)]
    pub secret: Option<String>,

    /// Connections per server (default: 16)
    #[serde(default = "default_connections")]
    pub connections_per_server: u32,

    /// Number of pieces downloaded in parallel (default: 16)
    #[serde(default = "default_connections")]
    pub split: u32,

    /// Minimum piece size in MiB (default: 10)
    #[serde(default = "default_min_split_size_mb")]
    pub min_split_size_mb: u32,

    /// Interval between status polls (default: 2 seconds)
    #[serde(default = "default_engine_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Timeout for a single RPC request (default: 30 seconds)
    #[serde(default = "default_rpc_timeout", with = "duration_serde")]
    pub rpc_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            secret: None,
            connections_per_server: default_connections(),
            split: default_connections(),
            min_split_size_mb: default_min_split_size_mb(),
            poll_interval: default_engine_poll_interval(),
            rpc_timeout: default_rpc_timeout(),
        }
    }
}

/// URL classification rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// File extensions that mark a URL as a direct file
    #[serde(default = "default_direct_extensions")]
    pub direct_extensions: Vec<String>,

    /// Path fragments that mark a URL as a direct file
    #[serde(default = "default_path_indicators")]
    pub direct_path_indicators: Vec<String>,

    /// Location of the extraction tool's supported-sites list
    #[serde(default = "default_supported_sites_url")]
    pub supported_sites_url: String,

    /// Download the supported-sites list on startup (default: true)
    #[serde(default = "default_true")]
    pub fetch_supported_sites: bool,

    /// Additional host patterns treated as extractable media
    #[serde(default)]
    pub extra_media_patterns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            direct_extensions: default_direct_extensions(),
            direct_path_indicators: default_path_indicators(),
            supported_sites_url: default_supported_sites_url(),
            fetch_supported_sites: true,
            extra_media_patterns: Vec::new(),
        }
    }
}

/// Extractor tools and candidate filters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Path to yt-dlp (searched in PATH when unset)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Page capture helper; invoked with the page URL, prints a JSON array of responses
    #[serde(default)]
    pub browser_command: Option<PathBuf>,

    /// Timeout for metadata probes and tool invocations (default: 15 seconds)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Timeout for page capture (default: 120 seconds)
    #[serde(default = "default_capture_timeout", with = "duration_serde")]
    pub capture_timeout: Duration,

    /// URL keywords that mark a captured stream as an ad or preview
    #[serde(default = "default_ad_keywords")]
    pub ad_keywords: Vec<String>,

    /// Smallest captured stream considered real content (default: 500 KB)
    #[serde(default = "default_min_video_size")]
    pub min_video_size: u64,

    /// Shortest captured stream considered real content (default: 30 seconds)
    #[serde(default = "default_min_video_duration", with = "duration_serde")]
    pub min_video_duration: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            browser_command: None,
            probe_timeout: default_probe_timeout(),
            capture_timeout: default_capture_timeout(),
            ad_keywords: default_ad_keywords(),
            min_video_size: default_min_video_size(),
            min_video_duration: default_min_video_duration(),
        }
    }
}

/// Delivery channels and retry cap
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Channel tried first (self-hosted Bot API server, no practical ceiling)
    #[serde(default)]
    pub high_capacity: Option<BotApiConfig>,

    /// Fallback channel (public Bot API, hard ceiling)
    #[serde(default)]
    pub low_capacity: Option<BotApiConfig>,

    /// Failed deliveries before the job is marked failed (default: 3)
    #[serde(default = "default_delivery_attempts")]
    pub max_attempts: u32,

    /// Wait after a failed delivery before the next attempt (default: 30 seconds)
    #[serde(default = "default_delivery_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Minimum interval between progress reports (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            high_capacity: None,
            low_capacity: None,
            max_attempts: default_delivery_attempts(),
            retry_delay: default_delivery_retry_delay(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Bot API endpoint used as a delivery channel
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotApiConfig {
    /// API base URL (e.g., "https://api.telegram.org")
    #[serde(default = "default_bot_api_base")]
    pub api_base: String,

    /// Bot token
    pub token: String,

    /// Upload ceiling in bytes (None = unlimited)
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,

    /// Upload timeout (default: 3600 seconds)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl BotApiConfig {
    /// Public Bot API with its 50 MB upload ceiling
    pub fn public(token: impl Into<String>) -> Self {
        Self {
            api_base: default_bot_api_base(),
            token: token.into(),
            max_upload_bytes: Some(50 * 1024 * 1024),
            timeout: default_upload_timeout(),
        }
    }

    /// Self-hosted Bot API server without an upload ceiling
    pub fn local(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token: token.into(),
            max_upload_bytes: None,
            timeout: default_upload_timeout(),
        }
    }
}

/// Data storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rpc_url() -> String {
    "http://localhost:6800/jsonrpc".to_string()
}

fn default_connections() -> u32 {
    16
}

fn default_min_split_size_mb() -> u32 {
    10
}

fn default_engine_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_direct_extensions() -> Vec<String> {
    [
        // video
        "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp",
        // audio
        "mp3", "flac", "wav", "aac", "ogg", "m4a", "opus",
        // archives
        "zip", "rar", "7z", "tar", "gz", "bz2", "xz",
        // documents
        "pdf", "epub",
        // images
        "jpg", "jpeg", "png", "gif", "webp",
        // installers and images
        "exe", "msi", "dmg", "iso", "apk", "deb", "rpm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_path_indicators() -> Vec<String> {
    ["/download/", "/files/", "/getfile/", "/get_file/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_supported_sites_url() -> String {
    "https://raw.githubusercontent.com/yt-dlp/yt-dlp/refs/heads/master/supportedsites.md"
        .to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_capture_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_ad_keywords() -> Vec<String> {
    [
        "ad",
        "advertisement",
        "promo",
        "preview",
        "teaser",
        "preroll",
        "midroll",
        "overlay",
        "splash",
        "commercial",
        "sponsor",
        "banner",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_min_video_size() -> u64 {
    500 * 1024
}

fn default_min_video_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_delivery_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(1));
        assert_eq!(config.pipeline.shutdown_timeout, Duration::from_secs(300));
        assert_eq!(config.pipeline.max_file_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(60));
        assert_eq!(config.engine.rpc_url, "http://localhost:6800/jsonrpc");
        assert_eq!(config.engine.poll_interval, Duration::from_secs(2));
        assert_eq!(config.delivery.progress_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.engine.split, 16);
        assert_eq!(config.extraction.min_video_size, 500 * 1024);
        assert!(config.classifier.direct_extensions.contains(&"mkv".to_string()));
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let config: Config =
            serde_json::from_str(r#"{"retry": {"base_delay": 5}, "pipeline": {"poll_interval": 3}}"#)
                .unwrap();
        assert_eq!(config.retry.base_delay, Duration::from_secs(5));
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(3));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["retry"]["base_delay"], 5);
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("retry.max_retries"))
            }
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_empty_bot_token() {
        let mut config = Config::default();
        config.delivery.low_capacity = Some(BotApiConfig::public(""));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_presets() {
        let public = BotApiConfig::public("t");
        assert_eq!(public.max_upload_bytes, Some(50 * 1024 * 1024));
        let local = BotApiConfig::local("http://localhost:8081", "t");
        assert_eq!(local.max_upload_bytes, None);
    }
}
