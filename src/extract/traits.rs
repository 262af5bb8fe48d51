//! Traits and types shared by the extractors

use crate::error::{Error, Result};
use crate::types::{JobId, Strategy};
use async_trait::async_trait;

/// A concrete fetchable resource produced by an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// URL (or magnet) handed to the fetch engine
    pub fetch_url: String,
    /// Extra request headers, in order
    pub headers: Vec<(String, String)>,
    /// `Cookie` header value, if the source needs one
    pub cookies: Option<String>,
    /// Sanitized display title
    pub title: String,
    /// Size in bytes when known before the transfer
    pub expected_size: Option<u64>,
    /// Suggested file name including extension
    pub filename: Option<String>,
}

impl Descriptor {
    /// Descriptor with no auth context or metadata beyond a title
    pub fn bare(fetch_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            fetch_url: fetch_url.into(),
            headers: Vec::new(),
            cookies: None,
            title: title.into(),
            expected_size: None,
            filename: None,
        }
    }

    /// File extension suggested by the descriptor, lowercase
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(crate::utils::extension_of)
            .or_else(|| {
                crate::utils::filename_from_url(&self.fetch_url)
                    .as_deref()
                    .and_then(crate::utils::extension_of)
            })
    }
}

/// Resolves a submitted reference into a [`Descriptor`]
///
/// One implementation exists per [`Strategy`]. Any error is a fetch-stage failure
/// and goes through the retry policy like a transfer error.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve `url` for job `id`
    async fn extract(&self, url: &str, id: JobId) -> Result<Descriptor>;

    /// Strategy this extractor serves
    fn strategy(&self) -> Strategy;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Reject sizes above `limit`
pub fn check_size_limit(size: Option<u64>, limit: u64) -> Result<()> {
    match size {
        Some(size) if size > limit => Err(Error::SizeLimit { size, limit }),
        _ => Ok(()),
    }
}
