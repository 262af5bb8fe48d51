//! Direct-file extractor: metadata probe only

use super::traits::{Descriptor, Extractor, check_size_limit};
use crate::error::Result;
use crate::types::{JobId, Strategy};
use crate::utils::{filename_from_headers, filename_from_url, sanitize_title};
use async_trait::async_trait;
use std::time::Duration;

/// Probes a direct link with `HEAD` to learn its size and name
///
/// The fetch URL is always the submitted URL. A probe that fails outright still
/// yields a descriptor with an unknown size; only a known size above the ceiling
/// is an error.
#[derive(Debug, Clone)]
pub struct DirectExtractor {
    client: reqwest::Client,
    probe_timeout: Duration,
    max_file_size: u64,
}

/// What a `HEAD` probe revealed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ProbeResult {
    size: Option<u64>,
    filename: Option<String>,
}

impl DirectExtractor {
    /// Create a new direct extractor
    pub fn new(client: reqwest::Client, probe_timeout: Duration, max_file_size: u64) -> Self {
        Self {
            client,
            probe_timeout,
            max_file_size,
        }
    }

    async fn probe(&self, url: &str) -> std::result::Result<ProbeResult, reqwest::Error> {
        let response = self
            .client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;

        // Read the header directly; the body of a HEAD response is always empty
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|size| *size > 0);

        Ok(ProbeResult {
            size,
            filename: filename_from_headers(response.headers(), response.url().as_str()),
        })
    }
}

#[async_trait]
impl Extractor for DirectExtractor {
    async fn extract(&self, url: &str, id: JobId) -> Result<Descriptor> {
        let probe = match self.probe(url).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(
                    job_id = id.0,
                    error = %e,
                    "Metadata probe failed, continuing with unknown size"
                );
                ProbeResult {
                    size: None,
                    filename: filename_from_url(url),
                }
            }
        };

        check_size_limit(probe.size, self.max_file_size)?;

        let title = probe
            .filename
            .as_deref()
            .map(|name| {
                let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
                sanitize_title(stem)
            })
            .unwrap_or_else(|| "download".to_string());

        tracing::info!(
            job_id = id.0,
            title = %title,
            size = ?probe.size,
            "Direct file descriptor ready"
        );

        Ok(Descriptor {
            fetch_url: url.to_string(),
            headers: Vec::new(),
            cookies: None,
            title,
            expected_size: probe.size,
            filename: probe.filename,
        })
    }

    fn strategy(&self) -> Strategy {
        Strategy::DirectFile
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
