//! Torrent extractor: the magnet is its own descriptor

use super::traits::{Descriptor, Extractor};
use crate::error::Result;
use crate::types::{JobId, Strategy};
use crate::utils::sanitize_title;
use async_trait::async_trait;

/// Passes magnets straight to the engine, no network access
#[derive(Debug, Default, Clone)]
pub struct TorrentExtractor;

#[async_trait]
impl Extractor for TorrentExtractor {
    async fn extract(&self, url: &str, id: JobId) -> Result<Descriptor> {
        let title = display_name(url)
            .map(|dn| sanitize_title(&dn))
            .unwrap_or_else(|| "Torrent".to_string());

        tracing::debug!(job_id = id.0, title = %title, "Torrent descriptor ready");
        Ok(Descriptor::bare(url, title))
    }

    fn strategy(&self) -> Strategy {
        Strategy::Torrent
    }

    fn name(&self) -> &'static str {
        "torrent"
    }
}

/// The `dn` (display name) parameter of a magnet link
fn display_name(magnet: &str) -> Option<String> {
    let query = magnet.strip_prefix("magnet:?")?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "dn")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|v| v.into_owned())
        })
        .filter(|v| !v.trim().is_empty())
}
