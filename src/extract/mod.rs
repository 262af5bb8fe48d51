//! Extractors: turn a submitted reference into a fetchable [`Descriptor`]
//!
//! ## Architecture
//!
//! Each [`Strategy`] has one [`Extractor`] implementation, looked up through an
//! [`ExtractorRegistry`]:
//!
//! - [`TorrentExtractor`]: the magnet itself is the descriptor
//! - [`DirectExtractor`]: `HEAD` probe for size and name
//! - [`MediaExtractor`]: external resolver ([`YtDlpResolver`]) for supported sites
//! - [`BrowserExtractor`]: headless page capture ([`CommandPageCapture`]) filtered by
//!   [`VideoFilter`]
//!
//! External tools sit behind the [`MediaResolver`] and [`PageCapture`] traits so the
//! pipeline can be exercised without them.

mod browser;
mod direct;
mod media;
mod torrent;
mod traits;

pub use browser::{
    BrowserExtractor, CapturedResponse, CommandPageCapture, PageCapture, VideoFilter,
};
pub use direct::DirectExtractor;
pub use media::{MediaExtractor, MediaInfo, MediaResolver, YtDlpResolver, parse_ytdlp_json};
pub use torrent::TorrentExtractor;
pub use traits::{Descriptor, Extractor, check_size_limit};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::Strategy;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps each [`Strategy`] to its extractor
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<Strategy, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Production registry built from configuration
    ///
    /// Media and browser extractors are only registered when their tool is available:
    /// `yt-dlp` from `extraction.ytdlp_path` or PATH, and the page-capture helper from
    /// `extraction.browser_command`. A job whose strategy has no extractor fails with
    /// [`Error::NotSupported`].
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let extraction = &config.extraction;
        let max_size = config.pipeline.max_file_size;

        let mut registry = Self::new();
        registry.register(Arc::new(TorrentExtractor));
        registry.register(Arc::new(DirectExtractor::new(
            client,
            extraction.probe_timeout,
            max_size,
        )));

        let resolver = match &extraction.ytdlp_path {
            Some(path) => Some(YtDlpResolver::new(path.clone(), extraction.capture_timeout)),
            None => YtDlpResolver::from_path(extraction.capture_timeout),
        };
        match resolver {
            Some(resolver) => {
                registry.register(Arc::new(MediaExtractor::new(Arc::new(resolver), max_size)));
            }
            None => tracing::warn!("yt-dlp not found, extractable-media jobs will fail"),
        }

        match &extraction.browser_command {
            Some(command) => {
                let capture = CommandPageCapture::new(command.clone(), extraction.capture_timeout);
                registry.register(Arc::new(BrowserExtractor::new(
                    Arc::new(capture),
                    VideoFilter::new(extraction, max_size),
                )));
            }
            None => tracing::warn!(
                "No page capture command configured, browser-discovered jobs will fail"
            ),
        }

        registry
    }

    /// Register (or replace) the extractor for its strategy
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.strategy(), extractor);
    }

    /// Extractor for `strategy`
    pub fn get(&self, strategy: Strategy) -> Result<Arc<dyn Extractor>> {
        self.extractors.get(&strategy).cloned().ok_or_else(|| {
            Error::NotSupported(format!("no extractor available for {} jobs", strategy))
        })
    }
}
