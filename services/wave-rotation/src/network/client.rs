//! Chain clients
//!
//! [`ChainClient`] is the seam the endpoint pool probes and calls through.
//! [`JsonRpcClient`] speaks plain Ethereum JSON-RPC over reqwest.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RpcError;

/// Read-only chain access used by probing and cost estimation
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    fn url(&self) -> &str;

    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn latest_block_timestamp(&self) -> Result<DateTime<Utc>, RpcError>;

    async fn gas_price_wei(&self) -> Result<u128, RpcError>;
}

/// Builds a client for an endpoint url
pub trait ChainConnector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError>;
}

/// Connector for real HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ChainConnector for HttpConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
        Ok(Arc::new(JsonRpcClient::new(url, self.timeout)?))
    }
}

/// Ethereum JSON-RPC over HTTP
pub struct JsonRpcClient {
    client: Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !resp.status().is_success() {
            return Err(RpcError::Transport(format!("http {}", resp.status())));
        }

        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Response {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{}: missing result", method)))
    }

    fn map_transport(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl ChainClient for JsonRpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let value = self.request("eth_chainId", json!([])).await?;
        let id = parse_quantity(&value)?;
        u64::try_from(id).map_err(|_| RpcError::InvalidResponse(format!("chain id out of range: {}", id)))
    }

    async fn latest_block_timestamp(&self) -> Result<DateTime<Utc>, RpcError> {
        let block = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let ts = block
            .get("timestamp")
            .ok_or_else(|| RpcError::InvalidResponse("block without timestamp".to_string()))?;
        let secs = i64::try_from(parse_quantity(ts)?)
            .map_err(|_| RpcError::InvalidResponse("block timestamp out of range".to_string()))?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| RpcError::InvalidResponse(format!("invalid block timestamp {}", secs)))
    }

    async fn gas_price_wei(&self) -> Result<u128, RpcError> {
        let value = self.request("eth_gasPrice", json!([])).await?;
        parse_quantity(&value)
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &Value) -> Result<u128, RpcError> {
    let raw = value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected hex string, got {}", value)))?;
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::InvalidResponse(format!("missing 0x prefix: {}", raw)))?;
    if hex.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(hex, 16).map_err(|e| RpcError::InvalidResponse(format!("{}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x2105")).unwrap(), 8453);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert!(parse_quantity(&json!("2105")).is_err());
        assert!(parse_quantity(&json!(8453)).is_err());
    }

    #[tokio::test]
    async fn test_json_rpc_chain_id_and_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_chainId"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x2105"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2, "result": {"number": "0x10", "timestamp": "0x6553f100"}
            })))
            .mount(&server)
            .await;

        let client = JsonRpcClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert_eq!(client.chain_id().await.unwrap(), 8453);
        let ts = client.latest_block_timestamp().await.unwrap();
        assert_eq!(ts.timestamp(), 0x6553f100);
    }

    #[tokio::test]
    async fn test_json_rpc_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "header not found"}
            })))
            .mount(&server)
            .await;

        let client = JsonRpcClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        match client.gas_price_wei().await {
            Err(RpcError::Response { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "header not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_rpc_http_failure_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = JsonRpcClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(matches!(client.chain_id().await, Err(RpcError::Transport(_))));
    }
}
