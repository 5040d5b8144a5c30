//! Ethereum JSON-RPC provider issuing `eth_call` requests

use crate::blockchain::abi::AbiFunction;
use crate::blockchain::provider::ContractCaller;
use crate::error::{EnsembleError, RpcError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Provider talking to one node endpoint
pub struct JsonRpcProvider {
    endpoint: String,
    client: Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EnsembleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn eth_call(&self, address: &str, calldata: &str) -> Result<String, RpcError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "eth_call",
            "params": [{ "to": address, "data": calldata }, "latest"],
        });

        let request = self.client.post(&self.endpoint).json(&body).send();
        let res = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| classify(e, self.timeout))?;

        let status = res.status();
        if !status.is_success() {
            let err_body = res.text().await.unwrap_or_default();
            // Rate limiting and server-side failures are worth another attempt
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(RpcError::Transport(format!("HTTP {}: {}", status, err_body)));
            }
            return Err(RpcError::Node {
                code: status.as_u16() as i64,
                message: err_body,
            });
        }

        let response: RpcResponse = res
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| RpcError::Decode("response has neither result nor error".to_string()))
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> RpcError {
    if error.is_timeout() {
        RpcError::Timeout(timeout.as_secs())
    } else {
        RpcError::Transport(error.to_string())
    }
}

/// Parse a `0x`-prefixed hex payload
pub fn decode_hex_payload(payload: &str) -> Result<Vec<u8>, RpcError> {
    let digits = payload.strip_prefix("0x").unwrap_or(payload);
    hex::decode(digits).map_err(|e| RpcError::Decode(format!("invalid hex payload: {}", e)))
}

#[async_trait]
impl ContractCaller for JsonRpcProvider {
    async fn call(&self, address: &str, function: &AbiFunction) -> Result<Value, RpcError> {
        let calldata = function.encode_call();
        tracing::debug!(
            endpoint = %self.endpoint,
            address,
            method = %function.name,
            calldata = %calldata,
            "eth_call"
        );
        let payload = self.eth_call(address, &calldata).await?;
        function.decode_output(&decode_hex_payload(&payload)?)
    }
}
