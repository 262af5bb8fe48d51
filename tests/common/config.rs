//! Configuration helpers for integration tests

use media_dl::{BotApiConfig, Config};
use std::path::Path;
use std::time::Duration;

/// Bot token used against mocked Bot API servers
pub const TEST_TOKEN: &str = "123456:test-token";

/// Configuration rooted in `dir` with short intervals and no network lookups
pub fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("media-dl.db");
    config.pipeline.download_dir = dir.join("downloads");
    config.pipeline.poll_interval = Duration::from_millis(20);
    config.pipeline.error_backoff = Duration::from_millis(20);
    config.pipeline.shutdown_timeout = Duration::from_secs(5);
    config.engine.poll_interval = Duration::from_millis(10);
    config.retry.base_delay = Duration::from_millis(20);
    config.retry.initial_delay = Duration::from_millis(5);
    config.delivery.retry_delay = Duration::from_millis(20);
    config.delivery.progress_interval = Duration::from_millis(10);
    config.classifier.fetch_supported_sites = false;
    config
}

/// Point the engine and a low-capacity channel at a mock server
pub fn mocked_config(dir: &Path, server_uri: &str) -> Config {
    let mut config = fast_config(dir);
    config.engine.rpc_url = format!("{}/jsonrpc", server_uri);
    config.delivery.low_capacity = Some(BotApiConfig {
        api_base: server_uri.to_string(),
        token: TEST_TOKEN.to_string(),
        max_upload_bytes: Some(50 * 1024 * 1024),
        timeout: Duration::from_secs(10),
    });
    config
}
