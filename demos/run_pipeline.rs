//! Run the pipeline from the command line
//!
//! Queues every URL given on the command line for one owner and runs the pipeline
//! until Ctrl+C / SIGTERM. Expects an aria2 daemon with RPC enabled and at least one
//! Bot API channel.
//!
//! ```text
//! aria2c --enable-rpc --rpc-secret=s3cret &
//! MEDIA_DL_BOT_TOKEN=123456:abc MEDIA_DL_OWNER=123456789 ARIA2_SECRET=s3cret \
//!     cargo run --example run_pipeline -- https://example.com/talk.mp4 "magnet:?xt=..."
//! ```
//!
//! Optional: `MEDIA_DL_LOCAL_API=http://localhost:8081` adds a self-hosted Bot API
//! server as the high-capacity channel. Logging follows `RUST_LOG`.

use media_dl::{BotApiConfig, Config, Event, JobOptions, MediaDownloader, run_with_shutdown};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_dl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let token = std::env::var("MEDIA_DL_BOT_TOKEN")?;
    let owner = std::env::var("MEDIA_DL_OWNER")?;

    let mut config = Config::default();
    config.engine.secret = std::env::var("ARIA2_SECRET").ok();
    config.delivery.low_capacity = Some(BotApiConfig::public(token.clone()));
    if let Ok(api_base) = std::env::var("MEDIA_DL_LOCAL_API") {
        config.delivery.high_capacity = Some(BotApiConfig::local(api_base, token));
    }

    let downloader = MediaDownloader::new(config).await?;

    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Fetching {
                    id,
                    percent,
                    rate_bps,
                    ..
                } => println!("#{} fetching {}% @ {:.2} MB/s", id, percent, rate_bps as f64 / 1_048_576.0),
                Event::Delivering { id, percent, .. } => println!("#{} uploading {}%", id, percent),
                Event::Delivered { id, channel, .. } => println!("#{} delivered via {}", id, channel),
                Event::Failed { id, stage, error } => println!("#{} failed at {:?}: {}", id, stage, error),
                _ => {}
            }
        }
    });

    for url in std::env::args().skip(1) {
        match downloader.enqueue(&url, &owner, JobOptions::default()).await {
            Ok(id) => println!("#{} queued: {}", id, url),
            Err(e) => eprintln!("Rejected {}: {}", url, e),
        }
    }

    run_with_shutdown(downloader).await?;
    Ok(())
}
