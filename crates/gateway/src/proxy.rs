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

//! Gateway HTTP server

use crate::{
    cache::{Cache, CacheBackendKind},
    dpow::{DpowClient, DpowConfig, DEFAULT_DPOW_URL},
    enrich::{PassthroughEnricher, ResponseEnricher, TimestampEnricher},
    error::GatewayError,
    health::HealthService,
    metrics::GatewayMetrics,
    reps::{RecommendedRepsRefresher, DEFAULT_REPS_URL, RECOMMENDED_REPS_REFRESH_INTERVAL},
    router::NodeRouter,
    upstream::{http_client, UpstreamRouter},
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use eyre::{bail, Result};
use nodegate_common::NodegateCachePath;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// Default primary node endpoint, a node's RPC server on its standard port
pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:7076";

/// Builder for configuring GatewayServer with fluent API and sensible defaults
#[derive(Clone)]
pub struct GatewayServerBuilder {
    node_url: String,
    work_url: Option<String>,
    cache_backend: CacheBackendKind,
    cache_capacity: usize,
    cache_file: Option<PathBuf>,
    cache_save_interval: u64,
    dpow_enabled: bool,
    dpow_url: String,
    dpow_user: Option<String>,
    dpow_key: Option<String>,
    reps_url: String,
    reps_refresh_interval: Duration,
    timestamps_url: Option<String>,
    enricher: Option<Arc<dyn ResponseEnricher>>,
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self {
            // Node Configuration
            node_url: DEFAULT_NODE_URL.to_string(),
            work_url: None, // Will use node_url

            // Cache Configuration
            cache_backend: CacheBackendKind::Memory,
            cache_capacity: 10_000,
            cache_file: None,       // Will use ~/.nodegate/cache/gateway.json
            cache_save_interval: 5, // 5 minutes

            // Proof-of-work Delegate Configuration
            dpow_enabled: false,
            dpow_url: DEFAULT_DPOW_URL.to_string(),
            dpow_user: None,
            dpow_key: None,

            // External Sources
            reps_url: DEFAULT_REPS_URL.to_string(),
            reps_refresh_interval: RECOMMENDED_REPS_REFRESH_INTERVAL,
            timestamps_url: None, // No enrichment by default
            enricher: None,
        }
    }
}

impl GatewayServerBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary node RPC endpoint
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = url.into();
        self
    }

    /// Set the endpoint answering `work_generate` and `representatives_online`
    pub fn work_url(mut self, url: impl Into<String>) -> Self {
        self.work_url = Some(url.into());
        self
    }

    /// Set the cache backend
    pub fn cache_backend(mut self, backend: CacheBackendKind) -> Self {
        self.cache_backend = backend;
        self
    }

    /// Set maximum number of entries kept by the memory backend
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the file backing the disk backend
    pub fn cache_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Set cache save interval in minutes (0 = save only on shutdown)
    pub fn cache_save_interval(mut self, minutes: u64) -> Self {
        self.cache_save_interval = minutes;
        self
    }

    /// Enable or disable the proof-of-work delegate
    pub fn dpow(mut self, enabled: bool) -> Self {
        self.dpow_enabled = enabled;
        self
    }

    /// Set the proof-of-work delegate endpoint
    pub fn dpow_url(mut self, url: impl Into<String>) -> Self {
        self.dpow_url = url.into();
        self
    }

    /// Set the proof-of-work delegate credentials
    pub fn dpow_credentials(mut self, user: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.dpow_user = Some(user.into());
        self.dpow_key = Some(api_key.into());
        self
    }

    /// Set the recommended representatives directory
    pub fn reps_url(mut self, url: impl Into<String>) -> Self {
        self.reps_url = url.into();
        self
    }

    /// Set how often the recommended representatives are refreshed
    pub fn reps_refresh_interval(mut self, interval: Duration) -> Self {
        self.reps_refresh_interval = interval;
        self
    }

    /// Set the timestamp service used for enrichment
    pub fn timestamps_url(mut self, url: impl Into<String>) -> Self {
        self.timestamps_url = Some(url.into());
        self
    }

    /// Set a custom response enricher, taking precedence over the timestamp service
    pub fn enricher(mut self, enricher: Arc<dyn ResponseEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    fn dpow_config(&self) -> Result<Option<DpowConfig>> {
        if !self.dpow_enabled {
            return Ok(None);
        }

        match (&self.dpow_user, &self.dpow_key) {
            (Some(user), Some(api_key)) if !user.is_empty() && !api_key.is_empty() => {
                Ok(Some(DpowConfig {
                    url: self.dpow_url.clone(),
                    user: user.clone(),
                    api_key: api_key.clone(),
                }))
            }
            _ => bail!("Proof-of-work delegate enabled without a user and API key"),
        }
    }

    /// Build the GatewayServer with the configured settings
    ///
    /// Background tasks are started immediately, so this must run inside a Tokio runtime.
    pub async fn build(self) -> Result<GatewayServer> {
        let dpow = self.dpow_config()?;
        let work_url = self.work_url.clone().unwrap_or_else(|| self.node_url.clone());

        // Only the disk backend touches the file system
        let cache_file = match self.cache_backend {
            CacheBackendKind::Disk => {
                NodegateCachePath::new(None::<PathBuf>).resolve_file(self.cache_file.clone())?
            }
            CacheBackendKind::Memory => self.cache_file.clone().unwrap_or_default(),
        };
        let cache = Cache::new(self.cache_backend.build(self.cache_capacity, cache_file)?);

        let client = http_client()?;
        let enricher: Arc<dyn ResponseEnricher> = match (self.enricher, self.timestamps_url) {
            (Some(enricher), _) => enricher,
            (None, Some(url)) => Arc::new(TimestampEnricher::new(client.clone(), url)),
            (None, None) => Arc::new(PassthroughEnricher),
        };

        let metrics = Arc::new(GatewayMetrics::new());
        let upstream = UpstreamRouter::new(client.clone(), self.node_url, work_url);
        let mut router = NodeRouter::new(cache.clone(), upstream)
            .with_enricher(enricher)
            .with_metrics(metrics);
        if let Some(config) = dpow {
            router = router.with_dpow(DpowClient::new(client.clone(), config));
        }

        let reps = RecommendedRepsRefresher::new(client, self.reps_url, cache.clone());

        GatewayServer::new(
            router,
            reps,
            cache,
            self.cache_backend,
            self.cache_save_interval,
            self.reps_refresh_interval,
        )
    }
}

/// Gateway server that combines node request routing, the representatives directory and
/// health reporting
///
/// Use GatewayServerBuilder for easy configuration:
/// ```no_run
/// # use nodegate_gateway::proxy::GatewayServerBuilder;
/// # async fn example() -> eyre::Result<()> {
/// let gateway = GatewayServerBuilder::new()
///     .node_url("http://127.0.0.1:7076")
///     .cache_capacity(50000)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GatewayServer {
    /// Node request handler with caching capabilities
    pub router: Arc<NodeRouter>,
    /// Recommended representatives directory
    pub reps: Arc<RecommendedRepsRefresher>,
    /// Health check service for monitoring
    pub health_service: Arc<HealthService>,
    cache: Cache,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Background tasks, awaited by [`GatewayServer::stop`]
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

#[derive(Clone)]
struct AppState {
    gateway: GatewayServer,
}

#[derive(Debug, Deserialize)]
struct NodeQuery {
    node: Option<String>,
}

impl GatewayServer {
    /// Creates a gateway server and starts its background tasks
    ///
    /// # Arguments
    /// * `router` - Fully configured node request router
    /// * `reps` - Recommended representatives refresher
    /// * `cache` - Cache shared by the router and the refresher
    /// * `cache_backend` - Kind of the cache backend, to decide whether flushing is useful
    /// * `cache_save_interval` - Minutes between periodic cache saves
    /// * `reps_refresh_interval` - Time between recommended representatives refreshes
    ///
    /// # Returns
    /// A new GatewayServer instance with background tasks started
    fn new(
        router: NodeRouter,
        reps: RecommendedRepsRefresher,
        cache: Cache,
        cache_backend: CacheBackendKind,
        cache_save_interval: u64,
        reps_refresh_interval: Duration,
    ) -> Result<Self> {
        info!("Starting Nodegate with {} cache", cache_backend);
        info!("  - primary node: {}", router.upstream().primary_url());
        info!("  - work node: {}", router.upstream().work_url());
        if router.delegates_work() {
            info!("  - work delegated to proof-of-work service");
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let reps = Arc::new(reps);
        let health_service = Arc::new(HealthService::new(cache.clone()));

        // Keep the recommended representatives warm
        let mut tasks = vec![reps.clone().spawn(reps_refresh_interval, shutdown_tx.subscribe())];

        // Start periodic cache saving (if enabled and useful)
        if cache_backend == CacheBackendKind::Disk && cache_save_interval > 0 {
            let cache_clone = cache.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                let period = Duration::from_secs(cache_save_interval * 60);
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            cache_clone.flush().await;
                            debug!("Cache saved to disk (periodic save)");
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        Ok(Self {
            router: Arc::new(router),
            reps,
            health_service,
            cache,
            shutdown_tx,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    /// Returns the shared cache
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Returns the request counters
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        self.router.metrics()
    }

    /// Signals the server and its background tasks to stop
    pub fn shutdown(&self) {
        // No receivers left means everything has already stopped.
        let _ = self.shutdown_tx.send(());
    }

    /// Signals shutdown and waits until the background tasks have finished
    pub async fn stop(&self) {
        self.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        debug!("Background tasks stopped");
    }

    /// Persists the cache
    pub async fn flush(&self) {
        self.cache.flush().await;
    }

    /// Axum application serving the gateway routes
    pub fn app(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_methods([Method::POST, Method::GET])
            .allow_headers(Any)
            .allow_origin(Any);

        Router::new()
            .route("/api/node-api", post(handle_node_api))
            .route("/api/recommended-representatives", get(handle_recommended_reps))
            .route("/api/health", get(handle_health))
            .route("/api/stats", get(handle_stats))
            .fallback(handle_not_found)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(AppState { gateway: self.clone() })
    }

    /// Starts the gateway listening on the specified address
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to
    ///
    /// # Returns
    /// Result indicating server startup success or failure
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cache_for_shutdown = self.cache.clone();
        let app = self.app();

        let listener = TcpListener::bind(addr).await?;
        info!("Nodegate listening on {}", addr);

        // Create the server with graceful shutdown
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, saving cache and stopping server gracefully");
            cache_for_shutdown.flush().await;
        });

        server.await?;

        Ok(())
    }
}

async fn handle_node_api(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::InvalidBody(e.body_text()))?;
    debug!("Received node request: {}", body);

    let response = state.gateway.router.handle(body, query.node.as_deref()).await?;
    debug!("Node response: {}", response.to_string().chars().take(200).collect::<String>());
    Ok(Json(response))
}

async fn handle_recommended_reps(
    State(state): State<AppState>,
) -> Result<Json<Value>, GatewayError> {
    match state.gateway.reps.get().await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            warn!("Recommended representatives unavailable: {}", e);
            Err(e)
        }
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.health_service.status().await)
}

async fn handle_stats(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.metrics().snapshot())
}

async fn handle_not_found(uri: Uri) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("No route for {}", uri.path()) })))
}
