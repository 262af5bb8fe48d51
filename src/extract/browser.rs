//! Browser-discovered extractor
//!
//! A page-capture helper renders the page in a headless browser and reports every
//! network response it saw. [`VideoFilter`] discards decoys (ads, previews, tiny or
//! oversized responses) and picks the longest, largest remaining stream.

use super::traits::{Descriptor, Extractor};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::{JobId, Strategy};
use crate::utils::{extension_of, filename_from_url, sanitize_title};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Content types (besides `video/*`) that carry a playable stream
const STREAM_CONTENT_TYPES: &[&str] = &[
    "application/x-mpegurl",
    "application/vnd.apple.mpegurl",
    "application/dash+xml",
];

/// One network response observed while the page loaded
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CapturedResponse {
    /// Response URL
    pub url: String,
    /// `Content-Type` header value
    #[serde(default, alias = "content-type")]
    pub content_type: String,
    /// Body size in bytes, if known
    #[serde(default)]
    pub size: Option<u64>,
    /// Media duration in seconds, if the helper probed it
    #[serde(default)]
    pub duration: Option<f64>,
    /// Request headers needed to replay the fetch (referer, cookies, user agent)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Renders a page and reports the responses it produced
#[async_trait]
pub trait PageCapture: Send + Sync {
    /// Load `url` and return every observed response
    async fn capture(&self, url: &str) -> Result<Vec<CapturedResponse>>;
}

/// [`PageCapture`] that runs an external helper command
///
/// The helper is invoked as `<command> <url>` and must print a JSON array of
/// `{url, content_type, size, duration, headers}` objects on stdout.
pub struct CommandPageCapture {
    command: PathBuf,
    timeout: Duration,
}

impl CommandPageCapture {
    /// Create a capture backed by `command`
    pub fn new(command: PathBuf, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl PageCapture for CommandPageCapture {
    async fn capture(&self, url: &str) -> Result<Vec<CapturedResponse>> {
        let child = Command::new(&self.command)
            .arg(url)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::ExternalTool(format!(
                    "page capture timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "Failed to execute {}: {}",
                    self.command.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::Extraction(format!(
                "page capture exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Extraction(format!("unreadable page capture output: {}", e)))
    }
}

/// Decoy filter and best-candidate selection
#[derive(Debug, Clone)]
pub struct VideoFilter {
    ad_keywords: Vec<String>,
    min_size: u64,
    min_duration: f64,
    max_size: u64,
}

impl VideoFilter {
    /// Build a filter from configuration and the size ceiling
    pub fn new(config: &ExtractionConfig, max_size: u64) -> Self {
        Self {
            ad_keywords: config
                .ad_keywords
                .iter()
                .map(|k| k.to_ascii_lowercase())
                .collect(),
            min_size: config.min_video_size,
            min_duration: config.min_video_duration.as_secs_f64(),
            max_size,
        }
    }

    /// Whether the response carries video
    pub fn is_video(&self, response: &CapturedResponse) -> bool {
        let content_type = response.content_type.to_ascii_lowercase();
        let mime = content_type.split(';').next().unwrap_or("").trim();
        mime.starts_with("video/") || STREAM_CONTENT_TYPES.contains(&mime)
    }

    /// Whether the URL names an ad or preview
    ///
    /// Keywords match whole URL words (optionally plural), so `ad` flags
    /// `/ads/preroll.mp4` but not `/download/movie.mp4`.
    pub fn is_ad(&self, response: &CapturedResponse) -> bool {
        let url = response.url.to_ascii_lowercase();
        url.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| {
                self.ad_keywords.iter().any(|k| {
                    word == k || word.strip_suffix('s').is_some_and(|stem| stem == k)
                })
            })
    }

    fn rejection(&self, response: &CapturedResponse) -> Option<&'static str> {
        if !self.is_video(response) {
            return Some("not video");
        }
        if self.is_ad(response) {
            return Some("ad keyword");
        }
        match response.size {
            Some(size) if size > 0 && size < self.min_size => return Some("too small"),
            Some(size) if size > self.max_size => return Some("too large"),
            _ => {}
        }
        match response.duration {
            Some(d) if d > 0.0 && d < self.min_duration => Some("too short"),
            _ => None,
        }
    }

    /// Pick the longest, then largest, plausible stream
    pub fn select(&self, candidates: Vec<CapturedResponse>) -> Option<CapturedResponse> {
        candidates
            .into_iter()
            .filter(|c| match self.rejection(c) {
                Some(reason) => {
                    tracing::debug!(url = %c.url, reason, "Discarded captured response");
                    false
                }
                None => true,
            })
            .max_by(|a, b| {
                let key = |c: &CapturedResponse| (c.duration.unwrap_or(0.0), c.size.unwrap_or(0));
                let (da, sa) = key(a);
                let (db, sb) = key(b);
                da.total_cmp(&db).then(sa.cmp(&sb))
            })
    }
}

/// Discovers streams by rendering the page
pub struct BrowserExtractor {
    capture: Arc<dyn PageCapture>,
    filter: VideoFilter,
}

impl BrowserExtractor {
    /// Create a browser extractor
    pub fn new(capture: Arc<dyn PageCapture>, filter: VideoFilter) -> Self {
        Self { capture, filter }
    }
}

#[async_trait]
impl Extractor for BrowserExtractor {
    async fn extract(&self, url: &str, id: JobId) -> Result<Descriptor> {
        tracing::info!(job_id = id.0, "Capturing page for video discovery");

        let candidates = self.capture.capture(url).await?;
        let observed = candidates.len();
        let best = self.filter.select(candidates).ok_or_else(|| {
            Error::Extraction(format!(
                "no plausible video among {} captured responses",
                observed
            ))
        })?;

        let name = filename_from_url(&best.url);
        let stem = name
            .as_deref()
            .map(|n| n.rsplit_once('.').map_or(n, |(stem, _)| stem))
            .unwrap_or("video");
        let title = sanitize_title(stem);
        let ext = name
            .as_deref()
            .and_then(extension_of)
            .unwrap_or_else(|| "mp4".to_string());

        let mut headers: Vec<(String, String)> = Vec::new();
        let mut cookies = None;
        for (key, value) in best.headers {
            if key.eq_ignore_ascii_case("cookie") {
                cookies = Some(value);
            } else {
                headers.push((key, value));
            }
        }

        tracing::info!(
            job_id = id.0,
            observed,
            size = ?best.size,
            duration = ?best.duration,
            "Selected captured stream"
        );

        Ok(Descriptor {
            filename: Some(format!("{}.{}", title, ext)),
            fetch_url: best.url,
            headers,
            cookies,
            title,
            expected_size: best.size,
        })
    }

    fn strategy(&self) -> Strategy {
        Strategy::BrowserDiscovered
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}
