//! Bot API upload channel

use super::traits::{DeliveryChannel, DeliveryRef, ProgressSink};
use crate::config::BotApiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// How often the transport's byte counter is sampled while uploading
const PROGRESS_TICK: Duration = Duration::from_millis(250);

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "aac", "ogg", "m4a", "opus"];

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Message>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    video: Option<FileRef>,
    #[serde(default)]
    audio: Option<FileRef>,
    #[serde(default)]
    document: Option<FileRef>,
    #[serde(default)]
    animation: Option<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
}

impl Message {
    fn file_id(self) -> Option<String> {
        self.video
            .or(self.audio)
            .or(self.document)
            .or(self.animation)
            .map(|f| f.file_id)
    }
}

/// Upload method and form field for a file, chosen by extension
fn upload_method(path: &Path) -> (&'static str, &'static str) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        ("sendVideo", "video")
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        ("sendAudio", "audio")
    } else {
        ("sendDocument", "document")
    }
}

/// Channel that uploads through a Bot API server
///
/// The same type serves both the self-hosted server (no ceiling) and the public API
/// (hard ceiling); only the [`BotApiConfig`] differs.
pub struct BotApiChannel {
    name: String,
    config: BotApiConfig,
    client: reqwest::Client,
}

impl BotApiChannel {
    /// Create a channel recorded on jobs as `name`
    pub fn new(name: impl Into<String>, config: BotApiConfig, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            config,
            client,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            method
        )
    }
}

#[async_trait]
impl DeliveryChannel for BotApiChannel {
    async fn send(
        &self,
        path: &Path,
        destination: &str,
        caption: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<DeliveryRef> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ArtifactMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let total = file.metadata().await?.len();

        if let Some(limit) = self.config.max_upload_bytes
            && total > limit
        {
            return Err(Error::Delivery(format!(
                "{} bytes exceeds the {} upload ceiling of {} bytes",
                total, self.name, limit
            )));
        }

        let (method, field) = upload_method(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let stream = ReaderStream::new(file).inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file_name);

        let mut form = Form::new()
            .text("chat_id", destination.to_string())
            .part(field, part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        if field == "video" {
            form = form.text("supports_streaming", "true");
        }

        tracing::info!(
            channel = %self.name,
            method,
            size = total,
            path = %path.display(),
            "Uploading artifact"
        );

        let request = self
            .client
            .post(self.endpoint(method))
            .multipart(form)
            .timeout(self.config.timeout)
            .send();
        tokio::pin!(request);

        let mut ticker = tokio::time::interval(PROGRESS_TICK);
        let response = loop {
            tokio::select! {
                result = &mut request => break result?,
                _ = ticker.tick() => progress.report(sent.load(Ordering::Relaxed), total),
            }
        };

        let status = response.status();
        let body = response.text().await?;
        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Delivery(format!(
                "{} returned HTTP {} with an unreadable body: {}",
                self.name, status, e
            ))
        })?;

        if !parsed.ok {
            return Err(Error::Delivery(format!(
                "{} rejected upload ({}): {}",
                self.name,
                parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                parsed.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        let file_id = parsed
            .result
            .and_then(Message::file_id)
            .ok_or_else(|| Error::Delivery(format!("{} response carried no file id", self.name)))?;

        progress.report(total, total);
        Ok(DeliveryRef(file_id))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn max_upload_bytes(&self) -> Option<u64> {
        self.config.max_upload_bytes
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver::NoProgress;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Recorder(Vec<(u64, u64)>);

    impl ProgressSink for Recorder {
        fn report(&mut self, current: u64, total: u64) {
            self.0.push((current, total));
        }
    }

    fn channel(server: &MockServer, ceiling: Option<u64>) -> BotApiChannel {
        BotApiChannel::new(
            "high_capacity",
            BotApiConfig {
                api_base: server.uri(),
                token: "123:abc".to_string(),
                max_upload_bytes: ceiling,
                timeout: Duration::from_secs(10),
            },
            reqwest::Client::new(),
        )
    }

    async fn artifact(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, vec![7u8; size]).await.unwrap();
        path
    }

    #[test]
    fn test_upload_method_by_extension() {
        assert_eq!(upload_method(Path::new("a.MP4")), ("sendVideo", "video"));
        assert_eq!(upload_method(Path::new("a.opus")), ("sendAudio", "audio"));
        assert_eq!(upload_method(Path::new("a.iso")), ("sendDocument", "document"));
        assert_eq!(upload_method(Path::new("noext")), ("sendDocument", "document"));
    }

    #[tokio::test]
    async fn test_video_upload_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendVideo"))
            .and(body_string_contains("name=\"chat_id\""))
            .and(body_string_contains("owner-42"))
            .and(body_string_contains("My Movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 1, "video": {"file_id": "VID123"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = artifact(&dir, "movie.mp4", 4096).await;
        let mut progress = Recorder(Vec::new());

        let reference = channel(&server, None)
            .send(&file, "owner-42", Some("My Movie"), &mut progress)
            .await
            .unwrap();

        assert_eq!(reference, DeliveryRef("VID123".to_string()));
        assert_eq!(progress.0.last(), Some(&(4096, 4096)));
    }

    #[tokio::test]
    async fn test_document_upload_uses_document_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendDocument"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"document": {"file_id": "DOC9"}}
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = artifact(&dir, "archive.zip", 10).await;
        let reference = channel(&server, None)
            .send(&file, "o", None, &mut NoProgress)
            .await
            .unwrap();
        assert_eq!(reference.0, "DOC9");
    }

    #[tokio::test]
    async fn test_over_ceiling_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = artifact(&dir, "big.mp4", 2048).await;
        let err = channel(&server, Some(1024))
            .send(&file, "o", None, &mut NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Delivery(ref m) if m.contains("upload ceiling")));
    }

    #[tokio::test]
    async fn test_api_error_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_json(json!({
                "ok": false,
                "error_code": 413,
                "description": "Request Entity Too Large"
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = artifact(&dir, "a.mkv", 16).await;
        let err = channel(&server, None)
            .send(&file, "o", None, &mut NoProgress)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("delivery failed:"), "{}", message);
        assert!(message.contains("413"));
        assert!(message.contains("Request Entity Too Large"));
    }

    #[tokio::test]
    async fn test_missing_file_is_artifact_missing() {
        let server = MockServer::start().await;
        let err = channel(&server, None)
            .send(Path::new("/nonexistent/x.mp4"), "o", None, &mut NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing(_)));
    }
}
