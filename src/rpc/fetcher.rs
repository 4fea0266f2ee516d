use crate::config::RpcConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::rpc::types::{ParsedTransaction, SignatureEntry};
use rand::Rng;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

/// A JSON-RPC request with an optional fallback method, reissued once if the
/// node reports the primary method as unknown.
pub struct RpcRequest {
    pub method: &'static str,
    pub fallback: Option<&'static str>,
    pub params: Value,
}

/// Paced, concurrency-bounded JSON-RPC client for the upstream data source.
///
/// The admission gate is shared across every session so the single upstream
/// rate budget is protected no matter how many trackers run. Each call sleeps
/// a base delay plus random jitter after completing, and 429s surface as
/// [`TrackerError::Throttled`] so the caller can back off instead of
/// retrying in place.
pub struct RpcFetcher {
    client: reqwest::Client,
    endpoint: String,
    gate: Arc<Semaphore>,
    pace_delay: Duration,
    pace_jitter: Duration,
    throttle_cooldown: Duration,
}

impl RpcFetcher {
    pub fn new(config: &RpcConfig) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            gate: Arc::new(Semaphore::new(config.concurrency)),
            pace_delay: config.pace_delay,
            pace_jitter: config.pace_jitter,
            throttle_cooldown: config.throttle_cooldown,
        })
    }

    /// Cooldown callers should observe after a throttled response.
    pub fn throttle_cooldown(&self) -> Duration {
        self.throttle_cooldown
    }

    /// Issue a JSON-RPC call, falling back once on "method not found".
    /// Returns the `result` field of the response envelope.
    pub async fn call(&self, request: RpcRequest) -> TrackerResult<Value> {
        let mut method = request.method;
        let mut fallback = request.fallback;

        loop {
            let body = self.call_once(method, &request.params).await?;

            if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
                let message = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("")
                    .to_string();
                if message.to_lowercase().contains("method not found") {
                    if let Some(fb) = fallback.take() {
                        warn!("Method {} not recognized, retrying with {}", method, fb);
                        method = fb;
                        continue;
                    }
                }
                return Err(TrackerError::Upstream(format!("{}: {}", method, message)));
            }

            return Ok(body.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// One HTTP round trip under the admission gate, with pacing afterwards.
    async fn call_once(&self, method: &str, params: &Value) -> TrackerResult<Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TrackerError::Unknown(format!("Admission gate closed: {}", e)))?;

        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!("RPC {} -> {}", method, self.endpoint);
        let response = self.client.post(&self.endpoint).json(&payload).send().await;

        // Pace while still holding the permit so the upstream sees at most
        // `concurrency` requests per pacing interval.
        self.pace().await;

        let response = response?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(TrackerError::Throttled);
        }
        if !status.is_success() {
            return Err(TrackerError::Upstream(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TrackerError::Malformed(format!("{}: {}", method, e)))
    }

    async fn pace(&self) {
        let jitter_ms = self.pace_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        sleep(self.pace_delay + jitter).await;
    }

    /// Recent signatures for an address, newest first.
    pub async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> TrackerResult<Vec<SignatureEntry>> {
        let result = self
            .call(RpcRequest {
                method: "getSignaturesForAddress",
                fallback: Some("getConfirmedSignaturesForAddress2"),
                params: json!([address, { "limit": limit }]),
            })
            .await?;

        serde_json::from_value(result)
            .map_err(|e| TrackerError::Malformed(format!("signature list: {}", e)))
    }

    /// Full jsonParsed transaction detail. `None` when the node has no record
    /// of the signature (pruned or not yet available).
    pub async fn transaction(&self, signature: &str) -> TrackerResult<Option<ParsedTransaction>> {
        let result = self
            .call(RpcRequest {
                method: "getTransaction",
                fallback: Some("getConfirmedTransaction"),
                params: json!([
                    signature,
                    { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }
                ]),
            })
            .await?;

        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| TrackerError::Malformed(format!("transaction {}: {}", signature, e)))
    }

    /// Circulating token supply in UI units, used by the oracle's
    /// price-times-supply market-cap fallback.
    pub async fn token_supply(&self, mint: &str) -> TrackerResult<f64> {
        let result = self
            .call(RpcRequest {
                method: "getTokenSupply",
                fallback: None,
                params: json!([mint]),
            })
            .await?;

        let value = result.get("value").cloned().unwrap_or(Value::Null);
        let amount: f64 = value
            .get("amount")
            .and_then(|a| a.as_str())
            .and_then(|a| a.parse().ok())
            .unwrap_or(0.0);
        let decimals = value.get("decimals").and_then(|d| d.as_u64()).unwrap_or(0);
        Ok(amount / 10_f64.powi(decimals as i32))
    }
}
