//! aria2 JSON-RPC fetch engine

use super::traits::{
    EngineFile, EngineHandle, EngineState, EngineStatus, FetchEngine, FetchRequest,
};
use crate::config::{EngineConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::Strategy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

const JSONRPC_VERSION: &str = "2.0";

/// Keys requested from `aria2.tellStatus`
const STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "uploadSpeed",
    "dir",
    "files",
    "errorCode",
    "errorMessage",
    "followedBy",
];

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TellStatus {
    status: String,
    #[serde(default)]
    total_length: NumStr,
    #[serde(default)]
    completed_length: NumStr,
    #[serde(default)]
    download_speed: NumStr,
    #[serde(default)]
    upload_speed: NumStr,
    dir: Option<String>,
    #[serde(default)]
    files: Vec<TellFile>,
    error_message: Option<String>,
    error_code: Option<String>,
    #[serde(default)]
    followed_by: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TellFile {
    path: String,
    #[serde(default)]
    length: NumStr,
}

/// aria2 reports every number as a decimal string
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct NumStr(String);

impl NumStr {
    fn value(&self) -> u64 {
        self.0.parse().unwrap_or(0)
    }
}

/// Client for an aria2 daemon started with `--enable-rpc`
pub struct Aria2Engine {
    client: reqwest::Client,
    config: EngineConfig,
    retry: RetryConfig,
    next_id: AtomicU64,
}

impl Aria2Engine {
    /// Create a client for `config.rpc_url`
    pub fn new(config: EngineConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.rpc_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            retry,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call an RPC method, retrying transient network failures
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut full_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
            full_params.push(Value::String(format!("token:{}", secret)));
        }
        full_params.extend(params);

        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: format!("media-dl-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            method,
            params: full_params,
        };

        let client = &self.client;
        let rpc_url = self.config.rpc_url.as_str();
        let request = &request;
        let response: RpcResponse = with_retry(&self.retry, move || async move {
            let response = client.post(rpc_url).json(request).send().await?;
            // aria2 answers RPC errors with a non-2xx status and a JSON body
            let status = response.status();
            let body = response.bytes().await?;
            let parsed = serde_json::from_slice::<RpcResponse>(&body).map_err(|e| {
                Error::Transfer(format!(
                    "aria2 returned an unreadable response (HTTP {}): {}",
                    status, e
                ))
            })?;
            Ok::<_, Error>(parsed)
        })
        .await?;

        if let Some(error) = response.error {
            return Err(Error::Transfer(format!(
                "aria2 {} failed ({}): {}",
                method, error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| Error::Transfer(format!("aria2 {} returned no result", method)))
    }

    /// Options object passed to `aria2.addUri`
    fn options_for(&self, request: &FetchRequest) -> Value {
        let mut options = serde_json::Map::new();
        options.insert("dir".into(), json!(request.output_dir.to_string_lossy()));
        if let Some(name) = &request.output_name {
            options.insert("out".into(), json!(name));
        }
        options.insert(
            "max-connection-per-server".into(),
            json!(self.config.connections_per_server.to_string()),
        );
        options.insert("split".into(), json!(self.config.split.to_string()));
        options.insert(
            "min-split-size".into(),
            json!(format!("{}M", self.config.min_split_size_mb)),
        );
        options.insert("continue".into(), json!("true"));
        options.insert("auto-file-renaming".into(), json!("false"));
        options.insert("allow-overwrite".into(), json!("true"));

        let mut headers: Vec<String> = request
            .descriptor
            .headers
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("cookie"))
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        if let Some(cookies) = &request.descriptor.cookies {
            headers.push(format!("Cookie: {}", cookies));
        }
        if !headers.is_empty() {
            options.insert("header".into(), json!(headers));
        }

        if request.strategy == Strategy::Torrent {
            // Stop as soon as the content is complete instead of seeding
            options.insert("seed-time".into(), json!("0"));
        }

        Value::Object(options)
    }
}

#[async_trait]
impl FetchEngine for Aria2Engine {
    async fn submit(&self, request: &FetchRequest) -> Result<EngineHandle> {
        let result = self
            .call(
                "aria2.addUri",
                vec![
                    json!([request.descriptor.fetch_url]),
                    self.options_for(request),
                ],
            )
            .await?;

        let gid = result
            .as_str()
            .ok_or_else(|| Error::Transfer("aria2.addUri returned a non-string GID".to_string()))?;

        tracing::info!(
            job_id = request.job_id.0,
            gid,
            out = ?request.output_name,
            "Submitted to aria2"
        );
        Ok(EngineHandle(gid.to_string()))
    }

    async fn poll(&self, handle: &EngineHandle) -> Result<EngineStatus> {
        let result = self
            .call("aria2.tellStatus", vec![json!(handle.0), json!(STATUS_KEYS)])
            .await?;
        let raw: TellStatus = serde_json::from_value(result)?;
        Ok(status_from_tell(raw))
    }

    async fn cancel(&self, handle: &EngineHandle) -> Result<()> {
        self.call("aria2.remove", vec![json!(handle.0)]).await?;
        tracing::info!(gid = %handle, "Removed aria2 transfer");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "aria2"
    }
}

fn status_from_tell(raw: TellStatus) -> EngineStatus {
    let error_message = match (raw.error_message, raw.error_code) {
        (Some(msg), _) if !msg.is_empty() => Some(msg),
        (_, Some(code)) if code != "0" => Some(format!("aria2 error code {}", code)),
        _ => None,
    };

    EngineStatus {
        state: EngineState::parse(&raw.status),
        completed: raw.completed_length.value(),
        total: raw.total_length.value(),
        download_rate: raw.download_speed.value(),
        upload_rate: raw.upload_speed.value(),
        files: raw
            .files
            .into_iter()
            .filter(|f| !f.path.is_empty() && !f.path.starts_with("[METADATA]"))
            .map(|f| EngineFile {
                length: f.length.value(),
                path: PathBuf::from(f.path),
            })
            .collect(),
        dir: raw.dir.filter(|d| !d.is_empty()).map(PathBuf::from),
        error_message,
        followed_by: raw.followed_by.into_iter().map(EngineHandle).collect(),
    }
}
