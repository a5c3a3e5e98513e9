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

//! Forwarding of node RPC requests to the configured endpoints

use crate::error::GatewayError;
use eyre::Result;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Connect timeout for every outbound HTTP call
///
/// Only connection setup is bounded; a node may legitimately take long to answer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the HTTP client shared by all outbound calls
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?)
}

/// Sends a prepared request and parses the JSON body
///
/// Transport failures and non-success statuses are turned into an error through `wrap`;
/// a body that is not JSON becomes [`GatewayError::InvalidResponse`].
pub(crate) async fn fetch_json(
    request: reqwest::RequestBuilder,
    service: &'static str,
    wrap: fn(String) -> GatewayError,
) -> Result<Value, GatewayError> {
    let response = request.send().await.map_err(|e| wrap(e.to_string()))?;
    let status = response.status();
    let text = response.text().await.map_err(|e| wrap(e.to_string()))?;

    if !status.is_success() {
        return Err(wrap(format!(
            "HTTP {}: {}",
            status,
            text.chars().take(200).collect::<String>()
        )));
    }

    serde_json::from_str(&text)
        .map_err(|e| GatewayError::InvalidResponse { service, reason: e.to_string() })
}

/// Where a node request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The primary ledger node
    Primary,
    /// The secondary node serving work and representatives
    Work,
    /// A caller supplied node; never cached, never enriched
    Override(String),
}

/// Forwards request bodies to the primary, work or override endpoint
pub struct UpstreamRouter {
    client: reqwest::Client,
    primary_url: String,
    work_url: String,
}

impl UpstreamRouter {
    /// Creates a router for the two configured endpoints
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `primary_url` - Ledger node answering ordinary queries
    /// * `work_url` - Node answering `work_generate` and `representatives_online`
    pub fn new(client: reqwest::Client, primary_url: String, work_url: String) -> Self {
        Self { client, primary_url, work_url }
    }

    /// Primary endpoint
    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    /// Work endpoint
    pub fn work_url(&self) -> &str {
        &self.work_url
    }

    /// Resolves a route to its URL
    pub fn url_for<'a>(&'a self, route: &'a Route) -> &'a str {
        match route {
            Route::Primary => &self.primary_url,
            Route::Work => &self.work_url,
            Route::Override(url) => url,
        }
    }

    /// Posts `body` unchanged to the route's endpoint
    ///
    /// Node-level errors (`{"error": ...}` with a success status) are returned as `Ok`.
    pub async fn forward(&self, route: &Route, body: &Value) -> Result<Value, GatewayError> {
        let url = self.url_for(route);
        debug!("Forwarding request to {}", url);

        let start = Instant::now();
        let request = self.client.post(url).header("Content-Type", "application/json").json(body);
        let response = fetch_json(request, "node", GatewayError::Upstream).await;

        debug!("Upstream {} answered in {}ms", url, start.elapsed().as_millis());
        response
    }
}
