//! aria2 JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::DaemonConfig;
use crate::daemon::{DownloadDaemon, TaskId, TaskState, TaskStatus, TransferRequest};
use crate::error::{Error, Result};

/// Fields requested from `aria2.tellStatus`.
const STATUS_KEYS: [&str; 5] = [
    "status",
    "totalLength",
    "completedLength",
    "errorCode",
    "errorMessage",
];

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    status: String,
    #[serde(default)]
    total_length: Option<String>,
    #[serde(default)]
    completed_length: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Version information returned by `aria2.getVersion`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aria2Version {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

/// JSON-RPC client for an aria2 daemon.
pub struct Aria2Client {
    client: Client,
    rpc_url: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

impl Aria2Client {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.rpc_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create RPC client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            secret: config.secret.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Build the request body for `method`.
    fn request_body(&self, id: u64, method: &str, params: Vec<Value>) -> Value {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(Value::String(format!("token:{}", secret)));
        }
        all.extend(params);

        json!({
            "jsonrpc": "2.0",
            "id": id.to_string(),
            "method": method,
            "params": all,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = self.request_body(id, method, params);

        tracing::trace!(method, id, "aria2 call");
        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        // aria2 answers errors with HTTP 400 and a JSON-RPC error object.
        let parsed: RpcResponse<T> = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Daemon(format!(
                "{} returned HTTP {} with an unreadable body: {}",
                method, status, e
            ))
        })?;

        if let Some(err) = parsed.error {
            return Err(Error::DaemonRpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| Error::Daemon(format!("{} returned neither result nor error", method)))
    }

    /// Query the daemon version; used as a connectivity check.
    pub async fn version(&self) -> Result<Aria2Version> {
        self.call("aria2.getVersion", Vec::new()).await
    }
}

/// Whether an RPC error says the GID is unknown.
fn is_unknown_gid(err: &Error) -> bool {
    matches!(err, Error::DaemonRpc { message, .. } if message.contains("is not found"))
}

fn parse_length(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn convert_status(raw: RawStatus) -> Result<TaskStatus> {
    let state = TaskState::from_aria2(&raw.status)
        .ok_or_else(|| Error::Daemon(format!("unknown task status '{}'", raw.status)))?;

    let error = if state == TaskState::Error {
        Some(match (raw.error_code, raw.error_message) {
            (Some(code), Some(message)) if !message.is_empty() => format!("[{}] {}", code, message),
            (Some(code), _) => format!("aria2 error code {}", code),
            (None, Some(message)) => message,
            (None, None) => "transfer failed".to_string(),
        })
    } else {
        None
    };

    Ok(TaskStatus {
        state,
        bytes_done: parse_length(raw.completed_length.as_deref()),
        bytes_total: parse_length(raw.total_length.as_deref()),
        error,
    })
}

#[async_trait]
impl DownloadDaemon for Aria2Client {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<TaskId> {
        let options = json!({
            "dir": request.dir.to_string_lossy(),
            "out": request.file_name,
            "allow-overwrite": "true",
            "auto-file-renaming": "false",
        });
        let gid: String = self
            .call("aria2.addUri", vec![json!([request.locator]), options])
            .await?;
        tracing::debug!(task_id = %gid, locator = %request.locator, "Created transfer");
        Ok(TaskId(gid))
    }

    async fn status(&self, task: &TaskId) -> Result<TaskStatus> {
        match self
            .call::<RawStatus>("aria2.tellStatus", vec![json!(task.0), json!(STATUS_KEYS)])
            .await
        {
            Ok(raw) => convert_status(raw),
            Err(e) if is_unknown_gid(&e) => Ok(TaskStatus::missing()),
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, task: &TaskId) -> Result<()> {
        match self.call::<String>("aria2.forceRemove", vec![json!(task.0)]).await {
            Ok(_) => Ok(()),
            Err(e) if is_unknown_gid(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn purge(&self, task: &TaskId) -> Result<()> {
        match self
            .call::<String>("aria2.removeDownloadResult", vec![json!(task.0)])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_unknown_gid(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
