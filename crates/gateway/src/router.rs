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

//! Node RPC request routing and caching logic

use crate::{
    allowlist::validate_action,
    cache::{Cache, ONLINE_REPRESENTATIVES_KEY},
    dpow::DpowClient,
    enrich::{enrich, PassthroughEnricher, ResponseEnricher},
    error::GatewayError,
    metrics::{GatewayMetrics, MetricEvent},
    policy::{is_cacheable_response, RepresentativesCachePolicy, WorkCachePolicy},
    singleflight::{FlightRole, SingleFlight},
    upstream::{Route, UpstreamRouter},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Override targets must be longer than this many characters to be honored
pub const MIN_OVERRIDE_LEN: usize = 4;

/// The caller supplied node, if it is long enough to be taken seriously
///
/// This is a sanity filter against empty or placeholder values, not URL validation.
pub fn accepted_override(node: Option<&str>) -> Option<&str> {
    node.filter(|node| node.chars().count() > MIN_OVERRIDE_LEN)
}

/// Node request handler with work and representatives caching
///
/// For every request, in order:
/// 1. the action is checked against the allowlist
/// 2. a caller supplied node bypasses everything below and receives the body as-is
/// 3. `work_generate` is served from cache by hash, else from the work node or the
///    proof-of-work service, and the work is cached without expiry
/// 4. `representatives_online` is served from cache, else from the work node, and the
///    response is cached for five minutes
/// 5. everything else goes to the primary node and is enriched with timestamps
pub struct NodeRouter {
    work_policy: WorkCachePolicy,
    reps_policy: RepresentativesCachePolicy,
    upstream: UpstreamRouter,
    dpow: Option<DpowClient>,
    enricher: Arc<dyn ResponseEnricher>,
    inflight: SingleFlight,
    metrics: Arc<GatewayMetrics>,
}

impl NodeRouter {
    /// Creates a router over the shared cache and the configured node endpoints
    ///
    /// Work is requested from the work node, no enrichment is applied and metrics start
    /// empty; see the `with_*` methods to change that.
    pub fn new(cache: Cache, upstream: UpstreamRouter) -> Self {
        Self {
            work_policy: WorkCachePolicy::new(cache.clone()),
            reps_policy: RepresentativesCachePolicy::new(cache),
            upstream,
            dpow: None,
            enricher: Arc::new(PassthroughEnricher),
            inflight: SingleFlight::new(),
            metrics: Arc::new(GatewayMetrics::new()),
        }
    }

    /// Sends all work requests to the proof-of-work service instead of the work node
    pub fn with_dpow(mut self, dpow: DpowClient) -> Self {
        self.dpow = Some(dpow);
        self
    }

    /// Sets the response enricher
    pub fn with_enricher(mut self, enricher: Arc<dyn ResponseEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Shares a metrics collection with the caller
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Overrides how long `representatives_online` responses are cached
    pub fn with_online_reps_ttl(mut self, ttl: Duration) -> Self {
        self.reps_policy = self.reps_policy.with_ttl(ttl);
        self
    }

    /// Request counters
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Node endpoints
    pub fn upstream(&self) -> &UpstreamRouter {
        &self.upstream
    }

    /// Whether work is delegated to the proof-of-work service
    pub fn delegates_work(&self) -> bool {
        self.dpow.is_some()
    }

    /// Handles one node request
    ///
    /// # Arguments
    /// * `body` - The request body, `{action, ...params}`
    /// * `node_override` - Raw value of the caller's `node` query parameter
    ///
    /// # Returns
    /// The node's JSON response (possibly from cache), or the error ending the request
    pub async fn handle(
        &self,
        body: Value,
        node_override: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let action = match validate_action(&body) {
            Ok(action) => action.to_string(),
            Err(e) => {
                self.metrics.record_rejected();
                debug!("Rejected request: {}", e);
                return Err(e);
            }
        };
        self.metrics.record(&action, MetricEvent::Request);

        let result = match accepted_override(node_override) {
            Some(node) => {
                info!("Forwarding {} to caller supplied node {}", action, node);
                self.metrics.record(&action, MetricEvent::UpstreamCall);
                self.upstream.forward(&Route::Override(node.to_string()), &body).await
            }
            None => match action.as_str() {
                "work_generate" => self.handle_work(&body).await,
                "representatives_online" => self.handle_online_reps(&body).await,
                _ => self.handle_primary(&action, &body).await,
            },
        };

        if let Err(e) = &result {
            self.metrics.record(&action, MetricEvent::Error);
            warn!("{} request failed: {}", action, e);
        }
        result
    }

    async fn handle_work(&self, body: &Value) -> Result<Value, GatewayError> {
        const ACTION: &str = "work_generate";
        let hash = WorkCachePolicy::hash_param(body)?;

        if let Some(cached) = self.work_policy.lookup(hash).await {
            self.metrics.record(ACTION, MetricEvent::CacheHit);
            return Ok(cached);
        }
        self.metrics.record(ACTION, MetricEvent::CacheMiss);

        let (result, role) = self
            .inflight
            .run(&format!("{ACTION}:{hash}"), || async {
                let response = match &self.dpow {
                    Some(dpow) => {
                        self.metrics.record(ACTION, MetricEvent::DelegateCall);
                        dpow.work_generate(hash).await?
                    }
                    None => {
                        self.metrics.record(ACTION, MetricEvent::UpstreamCall);
                        self.upstream.forward(&Route::Work, body).await?
                    }
                };

                self.work_policy.store(hash, &response).await;
                Ok::<_, GatewayError>(response)
            })
            .await;

        if role == FlightRole::Follower {
            self.metrics.record(ACTION, MetricEvent::Coalesced);
        }
        result
    }

    async fn handle_online_reps(&self, body: &Value) -> Result<Value, GatewayError> {
        const ACTION: &str = "representatives_online";

        if let Some(cached) = self.reps_policy.lookup().await {
            self.metrics.record(ACTION, MetricEvent::CacheHit);
            return Ok(cached);
        }
        self.metrics.record(ACTION, MetricEvent::CacheMiss);

        let (result, role) = self
            .inflight
            .run(ONLINE_REPRESENTATIVES_KEY, || async {
                self.metrics.record(ACTION, MetricEvent::UpstreamCall);
                let response = self.upstream.forward(&Route::Work, body).await?;

                self.reps_policy.store(&response).await;
                Ok::<_, GatewayError>(response)
            })
            .await;

        if role == FlightRole::Follower {
            self.metrics.record(ACTION, MetricEvent::Coalesced);
        }
        result
    }

    async fn handle_primary(&self, action: &str, body: &Value) -> Result<Value, GatewayError> {
        self.metrics.record(action, MetricEvent::UpstreamCall);
        let response = self.upstream.forward(&Route::Primary, body).await?;

        if is_cacheable_response(&response) {
            Ok(enrich(self.enricher.as_ref(), action, body, response).await)
        } else {
            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{work_key, DiskStore, RECOMMENDED_REPRESENTATIVES_KEY},
        dpow::DpowConfig,
        upstream::http_client,
    };
    use async_trait::async_trait;
    use futures::future::join_all;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    struct TestNodes {
        primary: MockServer,
        work: MockServer,
    }

    async fn create_test_nodes() -> TestNodes {
        TestNodes { primary: MockServer::start().await, work: MockServer::start().await }
    }

    fn create_test_router(nodes: &TestNodes, cache: Cache) -> NodeRouter {
        let upstream =
            UpstreamRouter::new(http_client().unwrap(), nodes.primary.uri(), nodes.work.uri());
        NodeRouter::new(cache, upstream)
    }

    fn disk_cache() -> (Cache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path().join("cache.json")).unwrap();
        (Cache::new(Arc::new(store)), temp_dir)
    }

    /// Tags enriched responses with the action that was enriched
    struct TaggingEnricher;

    #[async_trait]
    impl ResponseEnricher for TaggingEnricher {
        async fn account_history(&self, mut response: Value) -> Value {
            response["tagged"] = json!("account_history");
            response
        }

        async fn blocks_info(&self, hashes: &[String], mut response: Value) -> Value {
            response["tagged"] = json!(hashes);
            response
        }

        async fn pending(&self, mut response: Value) -> Value {
            response["tagged"] = json!("pending");
            response
        }
    }

    #[test]
    fn test_accepted_override() {
        assert_eq!(accepted_override(None), None);
        assert_eq!(accepted_override(Some("")), None);
        assert_eq!(accepted_override(Some("http")), None);
        assert_eq!(accepted_override(Some("a.io")), None);
        assert_eq!(accepted_override(Some("a.io:")), Some("a.io:"));
        // Characters, not bytes: three two-byte characters are still too short.
        assert_eq!(accepted_override(Some("ééé")), None);
        assert_eq!(accepted_override(Some("ééééé")), Some("ééééé"));
        assert_eq!(accepted_override(Some("node1")), Some("node1"));
        assert_eq!(
            accepted_override(Some("http://my-node:7076")),
            Some("http://my-node:7076")
        );
    }

    #[tokio::test]
    async fn test_disallowed_action_never_reaches_upstream() {
        nodegate_common::logging::ensure_test_logging(None);
        let nodes = create_test_nodes().await;

        for server in [&nodes.primary, &nodes.work] {
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
                .expect(0)
                .mount(server)
                .await;
        }

        let router = create_test_router(&nodes, Cache::memory(8));

        for body in [
            json!({"action": "delete_account"}),
            json!({"action": "wallet_create"}),
            json!({"hash": "ABCD"}),
        ] {
            assert!(router.handle(body, None).await.unwrap_err().is_validation());
        }

        // An override does not bypass the allowlist.
        let err = router
            .handle(json!({"action": "stop"}), Some("http://attacker-node:7076"))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::InvalidAction("stop".into()));
        assert_eq!(router.metrics().rejected(), 4);
    }

    #[tokio::test]
    async fn test_work_cached_by_hash() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"action": "work_generate", "hash": "ABCD"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "1234"})))
            .expect(1)
            .mount(&nodes.work)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&nodes.primary)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let body = json!({"action": "work_generate", "hash": "ABCD"});

        for _ in 0..3 {
            let response = router.handle(body.clone(), None).await.unwrap();
            assert_eq!(response, json!({"work": "1234"}));
        }

        let stats = router.metrics().action("work_generate");
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.upstream_calls, 1);
    }

    #[tokio::test]
    async fn test_work_requires_hash() {
        let nodes = create_test_nodes().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "1234"})))
            .expect(0)
            .mount(&nodes.work)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let err = router.handle(json!({"action": "work_generate"}), None).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::MissingParam { action: "work_generate".into(), param: "hash" }
        );
    }

    #[tokio::test]
    async fn test_work_node_error_not_cached() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Cancelled"})),
            )
            .expect(2)
            .mount(&nodes.work)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let body = json!({"action": "work_generate", "hash": "ABCD"});

        assert_eq!(router.handle(body.clone(), None).await, Ok(json!({"error": "Cancelled"})));
        assert_eq!(router.handle(body, None).await, Ok(json!({"error": "Cancelled"})));
    }

    #[tokio::test]
    async fn test_concurrent_work_requests_are_coalesced() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"work": "1234"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&nodes.work)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let body = json!({"action": "work_generate", "hash": "ABCD"});

        let results = join_all((0..4).map(|_| router.handle(body.clone(), None))).await;
        for result in results {
            assert_eq!(result, Ok(json!({"work": "1234"})));
        }

        let stats = router.metrics().action("work_generate");
        assert_eq!(stats.coalesced, 3);
        assert_eq!(stats.upstream_calls, 1);
    }

    #[tokio::test]
    async fn test_work_delegated_to_dpow() {
        let nodes = create_test_nodes().await;
        let dpow_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"hash": "ABCD", "timeout": 10})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "beef"})))
            .expect(1)
            .mount(&dpow_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "node"})))
            .expect(0)
            .mount(&nodes.work)
            .await;

        let dpow = DpowClient::new(
            http_client().unwrap(),
            DpowConfig { url: dpow_server.uri(), user: "u".into(), api_key: "k".into() },
        );
        let router = create_test_router(&nodes, Cache::memory(8)).with_dpow(dpow);
        assert!(router.delegates_work());

        let body = json!({"action": "work_generate", "hash": "ABCD"});
        assert_eq!(router.handle(body.clone(), None).await, Ok(json!({"work": "beef"})));
        assert_eq!(router.handle(body, None).await, Ok(json!({"work": "beef"})));
        assert_eq!(router.metrics().action("work_generate").delegate_calls, 1);
    }

    #[tokio::test]
    async fn test_dpow_failure_does_not_fall_back_to_node() {
        let nodes = create_test_nodes().await;
        let dpow_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&dpow_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "node"})))
            .expect(0)
            .mount(&nodes.work)
            .await;

        let dpow = DpowClient::new(
            http_client().unwrap(),
            DpowConfig { url: dpow_server.uri(), user: "u".into(), api_key: "k".into() },
        );
        let router = create_test_router(&nodes, Cache::memory(8)).with_dpow(dpow);

        let body = json!({"action": "work_generate", "hash": "ABCD"});
        let err = router.handle(body, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Delegate(_)));
        assert_eq!(router.metrics().action("work_generate").errors, 1);
    }

    #[tokio::test]
    async fn test_online_representatives_cached_with_ttl() {
        let nodes = create_test_nodes().await;
        let reps = json!({
            "representatives": {
                "nano_1natrium1o3z5519ifou7xii8crpxpk8y65qmkih8e8bpsjri651oza8imdd": "1000"
            }
        });

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"action": "representatives_online"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(&reps))
            .expect(2)
            .mount(&nodes.work)
            .await;

        let (cache, _temp_dir) = disk_cache();
        let router = create_test_router(&nodes, cache)
            .with_online_reps_ttl(Duration::from_millis(300));
        let body = json!({"action": "representatives_online", "weight": true});

        // Upstream, then cache within the window.
        assert_eq!(router.handle(body.clone(), None).await, Ok(reps.clone()));
        assert_eq!(router.handle(body.clone(), None).await, Ok(reps.clone()));

        // Upstream again after expiry.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(router.handle(body, None).await, Ok(reps));
    }

    #[tokio::test]
    async fn test_online_representatives_not_cached_by_memory_backend() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"representatives": {}})),
            )
            .expect(2)
            .mount(&nodes.work)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let body = json!({"action": "representatives_online"});

        router.handle(body.clone(), None).await.unwrap();
        router.handle(body, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_override_bypasses_cache_both_ways() {
        let nodes = create_test_nodes().await;
        let custom = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "evil"})))
            .expect(2)
            .mount(&custom)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "good"})))
            .expect(1)
            .mount(&nodes.work)
            .await;

        let (cache, _temp_dir) = disk_cache();
        cache.put(&work_key("CACHED"), "cached-work".to_string(), None).await;
        let router = create_test_router(&nodes, cache.clone());
        let node = custom.uri();
        let node = Some(node.as_str());

        // Overridden responses are not written to the cache...
        let body = json!({"action": "work_generate", "hash": "ABCD"});
        assert_eq!(router.handle(body.clone(), node).await, Ok(json!({"work": "evil"})));
        assert_eq!(cache.get(&work_key("ABCD")).await, None);

        // ...and a cached entry is not served to an overridden request.
        let cached = json!({"action": "work_generate", "hash": "CACHED"});
        assert_eq!(router.handle(cached, node).await, Ok(json!({"work": "evil"})));

        // The regular path still consults its own node.
        assert_eq!(router.handle(body, None).await, Ok(json!({"work": "good"})));
        assert_eq!(cache.get(&work_key("ABCD")).await.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_work_hash_cannot_read_fixed_entries() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"hash": RECOMMENDED_REPRESENTATIVES_KEY})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"work": "1234"})))
            .expect(1)
            .mount(&nodes.work)
            .await;

        let (cache, _temp_dir) = disk_cache();
        let snapshot = json!([{"account": "nano_1"}]);
        cache.put_json(RECOMMENDED_REPRESENTATIVES_KEY, &snapshot, None).await;
        let router = create_test_router(&nodes, cache.clone());

        let body = json!({"action": "work_generate", "hash": RECOMMENDED_REPRESENTATIVES_KEY});
        assert_eq!(router.handle(body, None).await, Ok(json!({"work": "1234"})));
        assert_eq!(cache.get_json(RECOMMENDED_REPRESENTATIVES_KEY).await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_override_skips_enrichment() {
        let nodes = create_test_nodes().await;
        let custom = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"history": []})))
            .expect(1)
            .mount(&custom)
            .await;

        let router =
            create_test_router(&nodes, Cache::memory(8)).with_enricher(Arc::new(TaggingEnricher));

        let body = json!({"action": "account_history", "account": "nano_1abc", "count": 10});
        let response = router.handle(body, Some(custom.uri().as_str())).await.unwrap();
        assert_eq!(response, json!({"history": []}));
    }

    #[tokio::test]
    async fn test_short_override_is_ignored() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": "7"})))
            .expect(1)
            .mount(&nodes.primary)
            .await;

        let router = create_test_router(&nodes, Cache::memory(8));
        let response = router.handle(json!({"action": "block_count"}), Some("x")).await;
        assert_eq!(response, Ok(json!({"count": "7"})));
    }

    #[tokio::test]
    async fn test_primary_responses_are_enriched() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"action": "account_history"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"history": []})))
            .mount(&nodes.primary)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"action": "blocks_info"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"blocks": {}})))
            .mount(&nodes.primary)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"action": "account_info"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balance": "1"})))
            .mount(&nodes.primary)
            .await;

        let router =
            create_test_router(&nodes, Cache::memory(8)).with_enricher(Arc::new(TaggingEnricher));

        let history = router
            .handle(json!({"action": "account_history", "account": "nano_1abc"}), None)
            .await
            .unwrap();
        assert_eq!(history["tagged"], "account_history");

        let blocks = router
            .handle(json!({"action": "blocks_info", "hashes": ["A", "B"]}), None)
            .await
            .unwrap();
        assert_eq!(blocks["tagged"], json!(["A", "B"]));

        let info = router.handle(json!({"action": "account_info"}), None).await.unwrap();
        assert_eq!(info, json!({"balance": "1"}));
    }

    #[tokio::test]
    async fn test_node_errors_are_not_enriched() {
        let nodes = create_test_nodes().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Bad account number"})),
            )
            .mount(&nodes.primary)
            .await;

        let router =
            create_test_router(&nodes, Cache::memory(8)).with_enricher(Arc::new(TaggingEnricher));

        let response = router.handle(json!({"action": "pending"}), None).await;
        assert_eq!(response, Ok(json!({"error": "Bad account number"})));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_error() {
        let upstream = UpstreamRouter::new(
            http_client().unwrap(),
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1".to_string(),
        );
        let router = NodeRouter::new(Cache::memory(8), upstream);

        let err = router.handle(json!({"action": "block_count"}), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
        assert_eq!(router.metrics().action("block_count").errors, 1);
    }
}
