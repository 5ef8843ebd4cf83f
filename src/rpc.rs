use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ChainError, Result};

/// Calls are issued one at a time per request, so a fixed id is enough.
const REQUEST_ID: u64 = 1;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Sends one JSON-RPC request and returns its `result`. No retries.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// JSON-RPC 2.0 over HTTP(S) POST.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::transport(None, e.to_string()))?;
        Ok(Self { client, url: url.into(), timeout })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ChainError {
        if e.is_timeout() {
            ChainError::Timeout(self.timeout)
        } else {
            ChainError::transport(e.status().map(|s| s.as_u16()), e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = RpcRequest { jsonrpc: "2.0", id: REQUEST_ID, method, params: &params };
        debug!(method, %params, "rpc request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            return Err(ChainError::transport(Some(status.as_u16()), text));
        }

        let envelope: RpcResponse = serde_json::from_str(&text)
            .map_err(|e| ChainError::Decode(format!("{method}: invalid JSON-RPC envelope: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(ChainError::Rpc { code: err.code, message: err.message });
        }
        // A missing result (e.g. unknown receipt) is JSON null.
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}
