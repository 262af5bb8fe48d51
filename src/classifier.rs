//! URL classification
//!
//! Maps a submitted reference to an acquisition [`Strategy`]. Checks run in a fixed
//! order and the first match wins:
//!
//! 1. `magnet:?` links are torrents
//! 2. a known file extension or download-style path is a direct file
//! 3. a host on the media extractor's supported-sites list is extractable media
//! 4. anything else is assumed to need a browser to discover the stream
//!
//! Only references that are neither magnets nor `http(s)` URLs with a host are
//! [`Classification::Unknown`], and those are rejected before a job exists.
//!
//! The supported-sites list is the only network-backed step. [`Classifier`] loads it
//! lazily, once, and only when the cheap checks did not already decide.

use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::types::Strategy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Result of classifying a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Reference is usable with this strategy
    Known(Strategy),
    /// Malformed input (no usable scheme or host)
    Unknown,
}

impl Classification {
    /// The strategy, or [`Error::InvalidUrl`] for unknown input
    pub fn into_strategy(self, url: &str) -> Result<Strategy> {
        match self {
            Classification::Known(strategy) => Ok(strategy),
            Classification::Unknown => Err(Error::InvalidUrl(truncate_for_message(url))),
        }
    }
}

/// Host patterns the media extractor can handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedSites {
    patterns: BTreeSet<String>,
}

impl SupportedSites {
    /// Build from explicit patterns (lowercased, wildcards stripped)
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|p| normalize_pattern(p.as_ref()))
                .collect(),
        }
    }

    /// Parse the extractor's published `supportedsites.md`
    ///
    /// Entries look like ` - **youtube:tab**: [*youtube*](## "netrc machine") YouTube`;
    /// the extractor name before any `:` sub-key is kept.
    pub fn parse(markdown: &str) -> Self {
        // Static pattern; a parse failure would be a programming error caught by tests
        let Ok(entry) = Regex::new(r"^\s*-\s*\*\*([^:*]+)") else {
            return Self::default();
        };

        Self::from_patterns(
            markdown
                .lines()
                .filter_map(|line| entry.captures(line))
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string())),
        )
    }

    /// Download and parse the list; any failure yields an empty list
    pub async fn load(client: &reqwest::Client, url: &str, timeout: Duration) -> Self {
        tracing::info!(url, "Loading supported sites list");

        let result = async {
            let response = client
                .get(url)
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?;
            response.text().await
        }
        .await;

        match result {
            Ok(body) => {
                let sites = Self::parse(&body);
                tracing::info!(patterns = sites.len(), "Loaded supported sites list");
                sites
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to load supported sites list, media sites will use browser discovery"
                );
                Self::default()
            }
        }
    }

    /// Add patterns on top of the loaded list
    pub fn extend<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns
            .extend(patterns.into_iter().filter_map(|p| normalize_pattern(p.as_ref())));
    }

    /// Number of known patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns are known
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `host` belongs to a supported site
    ///
    /// Dotted patterns match the host or any subdomain of it. Bare names match a
    /// whole host label, so `youtube` matches `www.youtube.com` but not `notyoutube.org`.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.patterns.iter().any(|pattern| {
            if pattern.contains('.') {
                host == *pattern || host.ends_with(&format!(".{}", pattern))
            } else {
                host.split('.').any(|label| label == pattern)
            }
        })
    }
}

fn normalize_pattern(raw: &str) -> Option<String> {
    let cleaned: String = raw.trim().to_ascii_lowercase().replace('*', "");
    let cleaned = cleaned.trim().trim_matches('.');
    // The catch-all extractor would claim every URL
    if cleaned.is_empty() || cleaned == "generic" || cleaned.contains(char::is_whitespace) {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Static classification rules
#[derive(Debug, Clone)]
pub struct Rules {
    direct_extensions: HashSet<String>,
    path_indicators: Vec<String>,
}

impl Rules {
    /// Build rules from configuration
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            direct_extensions: config
                .direct_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            path_indicators: config
                .direct_path_indicators
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    fn is_direct_path(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        let by_extension = path
            .rsplit('/')
            .next()
            .and_then(|segment| segment.rsplit_once('.'))
            .is_some_and(|(_, ext)| self.direct_extensions.contains(ext));

        by_extension || self.path_indicators.iter().any(|i| path.contains(i.as_str()))
    }
}

/// Classify a reference against `rules` and `sites`
pub fn classify(url: &str, rules: &Rules, sites: &SupportedSites) -> Classification {
    match classify_without_sites(url, rules) {
        Precheck::Decided(classification) => classification,
        Precheck::NeedsSites(host) => decide_by_sites(&host, sites),
    }
}

enum Precheck {
    Decided(Classification),
    NeedsSites(String),
}

fn classify_without_sites(url: &str, rules: &Rules) -> Precheck {
    let url = url.trim();

    if url.starts_with("magnet:?") {
        return Precheck::Decided(Classification::Known(Strategy::Torrent));
    }

    let Ok(parsed) = url::Url::parse(url) else {
        return Precheck::Decided(Classification::Unknown);
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Precheck::Decided(Classification::Unknown);
    }
    let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
        return Precheck::Decided(Classification::Unknown);
    };

    if rules.is_direct_path(parsed.path()) {
        return Precheck::Decided(Classification::Known(Strategy::DirectFile));
    }

    Precheck::NeedsSites(host.to_string())
}

fn decide_by_sites(host: &str, sites: &SupportedSites) -> Classification {
    if sites.matches_host(host) {
        Classification::Known(Strategy::ExtractableMedia)
    } else {
        Classification::Known(Strategy::BrowserDiscovered)
    }
}

/// Check that a reference could ever be classified, without any network access
pub fn validate_reference(url: &str) -> Result<()> {
    let rules = Rules {
        direct_extensions: HashSet::new(),
        path_indicators: Vec::new(),
    };
    match classify_without_sites(url, &rules) {
        Precheck::Decided(Classification::Unknown) => {
            Err(Error::InvalidUrl(truncate_for_message(url)))
        }
        _ => Ok(()),
    }
}

fn truncate_for_message(url: &str) -> String {
    url.chars().take(80).collect()
}

/// Classifier with a lazily loaded, cached supported-sites list
pub struct Classifier {
    rules: Rules,
    config: ClassifierConfig,
    client: reqwest::Client,
    timeout: Duration,
    sites: OnceCell<SupportedSites>,
}

impl Classifier {
    /// Create a classifier that downloads the supported-sites list on first need
    pub fn new(config: ClassifierConfig, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            rules: Rules::from_config(&config),
            config,
            client,
            timeout,
            sites: OnceCell::new(),
        }
    }

    /// Create a classifier with a fixed list (no network access)
    pub fn with_sites(config: ClassifierConfig, sites: SupportedSites) -> Self {
        let mut sites = sites;
        sites.extend(&config.extra_media_patterns);
        Self {
            rules: Rules::from_config(&config),
            config,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
            sites: OnceCell::new_with(Some(sites)),
        }
    }

    /// Classify a reference, loading the supported-sites list if it is needed
    pub async fn classify(&self, url: &str) -> Classification {
        match classify_without_sites(url, &self.rules) {
            Precheck::Decided(classification) => classification,
            Precheck::NeedsSites(host) => decide_by_sites(&host, self.sites().await),
        }
    }

    /// The supported-sites list, loading it on first call
    pub async fn sites(&self) -> &SupportedSites {
        self.sites
            .get_or_init(|| async {
                let mut sites = if self.config.fetch_supported_sites {
                    SupportedSites::load(
                        &self.client,
                        &self.config.supported_sites_url,
                        self.timeout,
                    )
                    .await
                } else {
                    SupportedSites::default()
                };
                sites.extend(&self.config.extra_media_patterns);
                sites
            })
            .await
    }
}
