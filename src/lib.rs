//! # media-dl
//!
//! Single-owner media acquisition pipeline. A caller submits a URL (a magnet link, a
//! direct file link, a page a media extraction tool understands, or a page whose video
//! only shows up once rendered) and the pipeline takes it the rest of the way:
//!
//! 1. **Classify** the reference into a [`Strategy`]
//! 2. **Extract** a fetchable [`Descriptor`](extract::Descriptor)
//! 3. **Fetch** it through an external multi-connection engine (aria2)
//! 4. **Deliver** the artifact through a Bot API channel, high capacity first
//!
//! Every transition is written to a SQLite job store, so a restart picks up where the
//! previous process stopped. At most one job is fetched and at most one is delivered
//! at any time; the two stages run as independent loops.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{BotApiConfig, Config, JobOptions, MediaDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.delivery.low_capacity = Some(BotApiConfig::public("123456:bot-token"));
//!
//!     let downloader = MediaDownloader::new(config).await?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader
//!         .enqueue("https://example.com/talk.mp4", "123456789", JobOptions::default())
//!         .await?;
//!     downloader.start().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// URL classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Job store (SQLite)
pub mod db;
/// Delivery adapter and channels
pub mod deliver;
/// Pipeline runner (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Extractors, one per strategy
pub mod extract;
/// Fetch engine adapter
pub mod fetch;
/// Retry policy and transient-call retries
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use classifier::{Classification, Classifier, SupportedSites};
pub use config::{BotApiConfig, Config};
pub use db::Database;
pub use deliver::{Deliverer, DeliveryChannel, DeliveryRef, ProgressSink};
pub use downloader::{Components, MediaDownloader};
pub use error::{DatabaseError, Error, JobError, Result};
pub use extract::{Descriptor, Extractor, ExtractorRegistry};
pub use fetch::{Aria2Engine, FetchEngine};
pub use types::{Event, Job, JobId, JobOptions, QueueSummary, Stage, Status, Strategy};

/// Start the pipeline and run it until a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever handler
///   could be registered.
/// - **Other platforms:** listens for Ctrl+C.
///
/// After the signal the downloader's graceful [`shutdown`](MediaDownloader::shutdown)
/// runs to completion.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, MediaDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(Config::default()).await?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    downloader.start().await?;
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, waiting for SIGTERM");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT");
            sigint.recv().await;
            tracing::info!("Received SIGINT");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "No signal handlers available, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C");
}
