// Nodegate - Ledger node RPC gateway
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Timestamp enrichment of node responses
//!
//! The node does not report when it first saw a block. A separate timestamp source does, and
//! its answers are attached to `account_history`, `blocks_info` and `pending` responses as a
//! `local_timestamp` field before they are returned to the caller. Enrichment only shapes the
//! caller's response; cached entries always hold the raw node response.

use crate::{error::GatewayError, upstream::fetch_json};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Field attached to blocks the timestamp source knows about
pub const LOCAL_TIMESTAMP_FIELD: &str = "local_timestamp";

/// Response transforms keyed on the original action
#[async_trait]
pub trait ResponseEnricher: Send + Sync {
    /// Transforms an `account_history` response
    async fn account_history(&self, response: Value) -> Value;

    /// Transforms a `blocks_info` response for the requested `hashes`
    async fn blocks_info(&self, hashes: &[String], response: Value) -> Value;

    /// Transforms a `pending` response
    async fn pending(&self, response: Value) -> Value;
}

/// Applies the transform matching `action`; other actions pass through unchanged
pub async fn enrich(
    enricher: &dyn ResponseEnricher,
    action: &str,
    request: &Value,
    response: Value,
) -> Value {
    match action {
        "account_history" => enricher.account_history(response).await,
        "blocks_info" => {
            let hashes: Vec<String> = request
                .get("hashes")
                .and_then(Value::as_array)
                .map(|hashes| hashes.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            enricher.blocks_info(&hashes, response).await
        }
        "pending" => enricher.pending(response).await,
        _ => response,
    }
}

/// Leaves every response untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnricher;

#[async_trait]
impl ResponseEnricher for PassthroughEnricher {
    async fn account_history(&self, response: Value) -> Value {
        response
    }

    async fn blocks_info(&self, _hashes: &[String], response: Value) -> Value {
        response
    }

    async fn pending(&self, response: Value) -> Value {
        response
    }
}

/// Attaches timestamps looked up from an HTTP timestamp service
///
/// The service accepts `{"hashes": [...]}` and answers with an object mapping each known hash
/// to its timestamp. Unknown hashes are left without a timestamp. If the service fails, the
/// response is returned as the node produced it.
pub struct TimestampEnricher {
    client: reqwest::Client,
    url: String,
}

impl TimestampEnricher {
    /// Creates an enricher querying the service at `url`
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    async fn lookup(&self, hashes: &[String]) -> Result<HashMap<String, Value>, GatewayError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let request = self.client.post(&self.url).json(&json!({ "hashes": hashes }));
        let response = fetch_json(request, "timestamp service", GatewayError::Upstream).await?;

        match response {
            Value::Object(map) => Ok(map.into_iter().filter(|(_, ts)| !ts.is_null()).collect()),
            other => Err(GatewayError::InvalidResponse {
                service: "timestamp service",
                reason: format!("expected an object, got {other}"),
            }),
        }
    }

    /// Looks up `hashes` and hands the result to `apply`, or returns `response` untouched
    async fn with_timestamps(
        &self,
        hashes: Vec<String>,
        mut response: Value,
        apply: fn(&mut Value, &HashMap<String, Value>),
    ) -> Value {
        match self.lookup(&hashes).await {
            Ok(timestamps) => {
                debug!("Attaching {} of {} timestamps", timestamps.len(), hashes.len());
                apply(&mut response, &timestamps);
                response
            }
            Err(e) => {
                warn!("Timestamp lookup failed, returning response without timestamps: {}", e);
                response
            }
        }
    }
}

fn history_hashes(response: &Value) -> Vec<String> {
    response
        .get("history")
        .and_then(Value::as_array)
        .map(|history| {
            history
                .iter()
                .filter_map(|entry| entry.get("hash").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn apply_history(response: &mut Value, timestamps: &HashMap<String, Value>) {
    let Some(history) = response.get_mut("history").and_then(Value::as_array_mut) else {
        return;
    };

    for entry in history.iter_mut() {
        let Some(ts) = entry.get("hash").and_then(Value::as_str).and_then(|h| timestamps.get(h))
        else {
            continue;
        };
        let ts = ts.clone();
        if let Some(entry) = entry.as_object_mut() {
            entry.insert(LOCAL_TIMESTAMP_FIELD.to_string(), ts);
        }
    }
}

/// Tags every object-shaped block of a `{hash: block}` map
fn tag_blocks(blocks: &mut Map<String, Value>, timestamps: &HashMap<String, Value>) {
    for (hash, block) in blocks.iter_mut() {
        if let (Some(ts), Some(block)) = (timestamps.get(hash), block.as_object_mut()) {
            block.insert(LOCAL_TIMESTAMP_FIELD.to_string(), ts.clone());
        }
    }
}

fn apply_blocks(response: &mut Value, timestamps: &HashMap<String, Value>) {
    if let Some(blocks) = response.get_mut("blocks").and_then(Value::as_object_mut) {
        tag_blocks(blocks, timestamps);
    }
}

fn pending_hashes(response: &Value) -> Vec<String> {
    response
        .get("blocks")
        .and_then(Value::as_object)
        .map(|blocks| blocks.keys().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl ResponseEnricher for TimestampEnricher {
    async fn account_history(&self, response: Value) -> Value {
        let hashes = history_hashes(&response);
        self.with_timestamps(hashes, response, apply_history).await
    }

    async fn blocks_info(&self, hashes: &[String], response: Value) -> Value {
        self.with_timestamps(hashes.to_vec(), response, apply_blocks).await
    }

    /// Only blocks returned with `source: true` (object shaped) can carry a timestamp; plain
    /// amount strings are left as they are.
    async fn pending(&self, response: Value) -> Value {
        let hashes = pending_hashes(&response);
        self.with_timestamps(hashes, response, apply_blocks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::http_client;
    use wiremock::{
        matchers::{body_json, method},
        Mock, MockServer, ResponseTemplate,
    };

    /// Tags its output so tests can tell the transform ran
    struct TaggingEnricher;

    #[async_trait]
    impl ResponseEnricher for TaggingEnricher {
        async fn account_history(&self, mut response: Value) -> Value {
            response["enriched"] = json!("account_history");
            response
        }

        async fn blocks_info(&self, hashes: &[String], mut response: Value) -> Value {
            response["enriched"] = json!(hashes);
            response
        }

        async fn pending(&self, mut response: Value) -> Value {
            response["enriched"] = json!("pending");
            response
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_action() {
        let enricher = TaggingEnricher;

        let history = enrich(&enricher, "account_history", &json!({}), json!({})).await;
        assert_eq!(history["enriched"], "account_history");

        let request = json!({"action": "blocks_info", "hashes": ["A", "B"]});
        let blocks = enrich(&enricher, "blocks_info", &request, json!({"blocks": {}})).await;
        assert_eq!(blocks["enriched"], json!(["A", "B"]));

        let pending = enrich(&enricher, "pending", &json!({}), json!({})).await;
        assert_eq!(pending["enriched"], "pending");

        let info = enrich(&enricher, "account_info", &json!({}), json!({"balance": "1"})).await;
        assert_eq!(info, json!({"balance": "1"}));
    }

    #[tokio::test]
    async fn test_passthrough() {
        let response = json!({"history": [{"hash": "A"}]});
        let enriched =
            enrich(&PassthroughEnricher, "account_history", &json!({}), response.clone()).await;
        assert_eq!(enriched, response);
    }

    #[tokio::test]
    async fn test_account_history_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"hashes": ["A", "B"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"A": 1550000000})))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = TimestampEnricher::new(http_client().unwrap(), server.uri());
        let response = json!({
            "account": "nano_1abc",
            "history": [
                {"type": "receive", "hash": "A", "amount": "1"},
                {"type": "send", "hash": "B", "amount": "2"}
            ]
        });

        let enriched = enricher.account_history(response).await;
        assert_eq!(enriched["history"][0][LOCAL_TIMESTAMP_FIELD], 1550000000);
        assert!(enriched["history"][1].get(LOCAL_TIMESTAMP_FIELD).is_none());
        assert_eq!(enriched["account"], "nano_1abc");
    }

    #[tokio::test]
    async fn test_blocks_info_and_pending_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"A": "1550000000", "B": null})),
            )
            .mount(&server)
            .await;

        let enricher = TimestampEnricher::new(http_client().unwrap(), server.uri());

        let blocks = json!({"blocks": {"A": {"amount": "1"}, "B": {"amount": "2"}}});
        let enriched = enricher.blocks_info(&["A".to_string(), "B".to_string()], blocks).await;
        assert_eq!(enriched["blocks"]["A"][LOCAL_TIMESTAMP_FIELD], "1550000000");
        assert!(enriched["blocks"]["B"].get(LOCAL_TIMESTAMP_FIELD).is_none());

        let pending = json!({"blocks": {"A": {"amount": "1", "source": "nano_1src"}, "B": "2"}});
        let enriched = enricher.pending(pending).await;
        assert_eq!(enriched["blocks"]["A"][LOCAL_TIMESTAMP_FIELD], "1550000000");
        assert_eq!(enriched["blocks"]["B"], "2");
    }

    #[tokio::test]
    async fn test_service_failure_returns_raw_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let enricher = TimestampEnricher::new(http_client().unwrap(), server.uri());
        let response = json!({"history": [{"hash": "A"}]});
        assert_eq!(enricher.account_history(response.clone()).await, response);
    }

    #[tokio::test]
    async fn test_empty_history_skips_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let enricher = TimestampEnricher::new(http_client().unwrap(), server.uri());
        let response = json!({"history": ""});
        assert_eq!(enricher.account_history(response.clone()).await, response);
    }
}
