//! Minimal JSON-RPC 2.0 client shared by the balance reader and the holder index.
//!
//! Every call is bounded by a timeout. There is no retry loop here: the cycle
//! loop retries on its next tick.

use crate::error::{Result, RpcError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const RPC_CALL_TIMEOUT_MS: u64 = 10_000;
const RPC_ERR_MAX_LEN: usize = 260;

fn rpc_call_timeout_ms() -> u64 {
    std::env::var("RPC_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (250..=60_000).contains(v))
        .unwrap_or(RPC_CALL_TIMEOUT_MS)
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("credits")
}

fn compact_rpc_error_message(message: &str) -> String {
    crate::utils::error::compact_error_message(message, RPC_ERR_MAX_LEN)
}

/// Builds a reqwest client with a request timeout, falling back to the default
/// client when the builder fails.
pub fn http_client(timeout: Duration) -> Client {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(
                "[RPC] failed to construct timeout HTTP client: {err}. Falling back to default client."
            );
            Client::new()
        }
    }
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

pub struct JsonRpcClient {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(Duration::from_millis(rpc_call_timeout_ms())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Endpoint with any `api-key` query stripped, for logs.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once('?') {
            Some((base, _)) => format!("{base}?<redacted>"),
            None => self.url.clone(),
        }
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| RpcError::Transport(compact_rpc_error_message(&err.to_string())))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Api {
                endpoint: self.redacted_url(),
                status: status.as_u16(),
                body: compact_rpc_error_message(&body),
            }
            .into());
        }

        let envelope = resp
            .json::<RpcEnvelope<T>>()
            .await
            .map_err(|err| RpcError::Decode {
                endpoint: self.redacted_url(),
                reason: compact_rpc_error_message(&err.to_string()),
            })?;

        if let Some(err) = envelope.error {
            let message = format!(
                "code={} {}",
                err.code.unwrap_or_default(),
                err.message.unwrap_or_default()
            );
            if is_rate_limited_rpc_error(&message) {
                tracing::debug!("[RPC] `{}` rate limited by {}", method, self.redacted_url());
            }
            return Err(RpcError::Rpc {
                method: method.to_string(),
                message: compact_rpc_error_message(&message),
            }
            .into());
        }

        envelope.result.ok_or_else(|| {
            RpcError::Decode {
                endpoint: self.redacted_url(),
                reason: format!("`{method}` returned neither result nor error"),
            }
            .into()
        })
    }
}
