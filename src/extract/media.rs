//! Extractable-media extractor backed by an external resolver (yt-dlp)

use super::traits::{Descriptor, Extractor, check_size_limit};
use crate::error::{Error, Result};
use crate::types::{JobId, Strategy};
use crate::utils::sanitize_title;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Stream information returned by a [`MediaResolver`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    /// Direct stream URL
    pub url: String,
    /// Headers the stream host expects
    pub http_headers: Vec<(String, String)>,
    /// `Cookie` header value, if any
    pub cookies: Option<String>,
    /// Human title
    pub title: Option<String>,
    /// Exact or approximate size in bytes
    pub size: Option<u64>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Container extension (e.g. "mp4")
    pub ext: Option<String>,
}

/// Resolves a page URL into one concrete media stream
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve the best single stream for `url`
    async fn resolve(&self, url: &str) -> Result<MediaInfo>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// [`MediaResolver`] that runs `yt-dlp -J`
pub struct YtDlpResolver {
    binary_path: PathBuf,
    timeout: Duration,
}

impl YtDlpResolver {
    /// Create a resolver with an explicit binary path
    pub fn new(binary_path: PathBuf, timeout: Duration) -> Self {
        Self {
            binary_path,
            timeout,
        }
    }

    /// Attempt to find `yt-dlp` in PATH
    pub fn from_path(timeout: Duration) -> Option<Self> {
        which::which("yt-dlp")
            .ok()
            .map(|path| Self::new(path, timeout))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<MediaInfo> {
        let child = Command::new(&self.binary_path)
            .arg("-J")
            .arg("--no-playlist")
            .arg("-f")
            .arg("best")
            .arg("--no-warnings")
            .arg(url)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                Error::ExternalTool(format!(
                    "yt-dlp timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(Error::Extraction(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                last_line.unwrap_or("no output")
            )));
        }

        parse_ytdlp_json(&output.stdout)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    http_headers: BTreeMap<String, String>,
    cookies: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    #[serde(flatten)]
    top: YtDlpFormat,
    requested_formats: Option<Vec<YtDlpFormat>>,
    formats: Option<Vec<YtDlpFormat>>,
}

/// Parse the JSON document printed by `yt-dlp -J`
///
/// The stream is the first of `requested_formats` (merged downloads), else the
/// top-level format, else the last listed format with a URL (formats are sorted
/// worst to best).
pub fn parse_ytdlp_json(stdout: &[u8]) -> Result<MediaInfo> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| Error::Extraction(format!("unreadable yt-dlp output: {}", e)))?;

    let YtDlpInfo {
        title,
        duration,
        top,
        requested_formats,
        formats,
    } = info;

    let format = requested_formats
        .and_then(|fs| fs.into_iter().find(|f| f.url.is_some()))
        .or_else(|| top.url.is_some().then_some(top))
        .or_else(|| formats.and_then(|fs| fs.into_iter().rev().find(|f| f.url.is_some())))
        .ok_or_else(|| Error::Extraction("yt-dlp returned no downloadable format".to_string()))?;

    let size = format
        .filesize
        .or(format.filesize_approx)
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| s as u64);

    Ok(MediaInfo {
        url: format.url.unwrap_or_default(),
        http_headers: format.http_headers.into_iter().collect(),
        cookies: format.cookies.filter(|c| !c.trim().is_empty()),
        title,
        size,
        duration,
        ext: format.ext,
    })
}

/// Resolves supported media pages through a [`MediaResolver`]
pub struct MediaExtractor {
    resolver: Arc<dyn MediaResolver>,
    max_file_size: u64,
}

impl MediaExtractor {
    /// Create a media extractor
    pub fn new(resolver: Arc<dyn MediaResolver>, max_file_size: u64) -> Self {
        Self {
            resolver,
            max_file_size,
        }
    }
}

#[async_trait]
impl Extractor for MediaExtractor {
    async fn extract(&self, url: &str, id: JobId) -> Result<Descriptor> {
        tracing::info!(job_id = id.0, resolver = self.resolver.name(), "Resolving media stream");

        let info = self.resolver.resolve(url).await?;
        if info.url.is_empty() {
            return Err(Error::Extraction("resolver returned an empty stream URL".to_string()));
        }
        check_size_limit(info.size, self.max_file_size)?;

        let title = sanitize_title(info.title.as_deref().unwrap_or("video"));
        let ext = info.ext.as_deref().unwrap_or("mp4");

        tracing::info!(
            job_id = id.0,
            title = %title,
            size = ?info.size,
            duration = ?info.duration,
            "Media descriptor ready"
        );

        Ok(Descriptor {
            filename: Some(format!("{}.{}", title, ext)),
            fetch_url: info.url,
            headers: info.http_headers,
            cookies: info.cookies,
            title,
            expected_size: info.size,
        })
    }

    fn strategy(&self) -> Strategy {
        Strategy::ExtractableMedia
    }

    fn name(&self) -> &'static str {
        "media"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(MediaInfo);

    #[async_trait]
    impl MediaResolver for FixedResolver {
        async fn resolve(&self, _url: &str) -> Result<MediaInfo> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    #[test]
    fn test_parse_top_level_format() {
        let json = br#"{
            "title": "Big Buck Bunny (4K)",
            "duration": 596.5,
            "url": "https://cdn.example.com/v.mp4?sig=abc",
            "ext": "mp4",
            "filesize": 1048576,
            "http_headers": {"User-Agent": "Mozilla/5.0", "Referer": "https://example.com/"},
            "cookies": "session=1; Domain=.example.com"
        }"#;

        let info = parse_ytdlp_json(json).unwrap();
        assert_eq!(info.url, "https://cdn.example.com/v.mp4?sig=abc");
        assert_eq!(info.size, Some(1048576));
        assert_eq!(info.duration, Some(596.5));
        assert_eq!(info.ext.as_deref(), Some("mp4"));
        assert_eq!(info.title.as_deref(), Some("Big Buck Bunny (4K)"));
        assert_eq!(info.http_headers.len(), 2);
        assert_eq!(info.cookies.as_deref(), Some("session=1; Domain=.example.com"));
    }

    #[test]
    fn test_parse_prefers_requested_formats() {
        let json = br#"{
            "title": "clip",
            "requested_formats": [
                {"url": "https://cdn.example.com/video.webm", "ext": "webm", "filesize_approx": 2048.7},
                {"url": "https://cdn.example.com/audio.m4a", "ext": "m4a"}
            ]
        }"#;

        let info = parse_ytdlp_json(json).unwrap();
        assert_eq!(info.url, "https://cdn.example.com/video.webm");
        assert_eq!(info.size, Some(2048));
    }

    #[test]
    fn test_parse_falls_back_to_best_listed_format() {
        let json = br#"{
            "title": "clip",
            "formats": [
                {"url": "https://cdn.example.com/low.mp4", "ext": "mp4"},
                {"url": null, "ext": "mhtml"},
                {"url": "https://cdn.example.com/high.mp4", "ext": "mp4", "filesize": null}
            ]
        }"#;

        let info = parse_ytdlp_json(json).unwrap();
        assert_eq!(info.url, "https://cdn.example.com/high.mp4");
        assert_eq!(info.size, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_ytdlp_json(b"not json"), Err(Error::Extraction(_))));
        assert!(matches!(
            parse_ytdlp_json(br#"{"title": "x"}"#),
            Err(Error::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_builds_descriptor() {
        let resolver = FixedResolver(MediaInfo {
            url: "https://cdn.example.com/v.mp4".to_string(),
            http_headers: vec![("Referer".to_string(), "https://example.com/".to_string())],
            cookies: Some("a=b".to_string()),
            title: Some("Great Talk: Part #2".to_string()),
            size: Some(100),
            duration: Some(60.0),
            ext: Some("webm".to_string()),
        });
        let extractor = MediaExtractor::new(Arc::new(resolver), 1000);

        let d = extractor.extract("https://example.com/watch/1", JobId(3)).await.unwrap();
        assert_eq!(d.fetch_url, "https://cdn.example.com/v.mp4");
        assert_eq!(d.title, "Great Talk Part 2");
        assert_eq!(d.filename.as_deref(), Some("Great Talk Part 2.webm"));
        assert_eq!(d.cookies.as_deref(), Some("a=b"));
        assert_eq!(d.headers.len(), 1);
    }

    #[tokio::test]
    async fn test_extract_enforces_size_limit() {
        let resolver = FixedResolver(MediaInfo {
            url: "https://cdn.example.com/v.mp4".to_string(),
            size: Some(5000),
            ..Default::default()
        });
        let extractor = MediaExtractor::new(Arc::new(resolver), 1000);
        let err = extractor.extract("https://example.com/w", JobId(1)).await.unwrap_err();
        assert!(matches!(err, Error::SizeLimit { size: 5000, limit: 1000 }));
    }

    #[test]
    fn test_from_path_consistency_with_which_crate() {
        let which_result = which::which("yt-dlp");
        let from_path_result = YtDlpResolver::from_path(Duration::from_secs(1));
        assert_eq!(which_result.is_ok(), from_path_result.is_some());
    }
}
