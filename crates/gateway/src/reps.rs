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

//! Recommended representatives directory, kept warm by a background refresher

use crate::{
    cache::{Cache, RECOMMENDED_REPRESENTATIVES_KEY},
    error::GatewayError,
    upstream::fetch_json,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

/// Default directory of verified representative accounts
pub const DEFAULT_REPS_URL: &str = "https://mynano.ninja/api/accounts/verified";

/// How often the snapshot is refreshed in the background
pub const RECOMMENDED_REPS_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How long a fetched snapshot is served from cache
pub const RECOMMENDED_REPS_TTL: Duration = Duration::from_secs(45 * 60);

/// Fetches the directory and keeps its last snapshot in the cache
pub struct RecommendedRepsRefresher {
    client: reqwest::Client,
    url: String,
    cache: Cache,
    ttl: Duration,
}

impl RecommendedRepsRefresher {
    /// Creates a refresher for the directory at `url`
    pub fn new(client: reqwest::Client, url: String, cache: Cache) -> Self {
        Self { client, url, cache, ttl: RECOMMENDED_REPS_TTL }
    }

    /// Overrides the freshness window of stored snapshots
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Directory endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the directory and stores the snapshot
    ///
    /// The directory must answer with a JSON array; anything else is rejected and the
    /// previous snapshot is left in place.
    pub async fn refresh(&self) -> Result<Value, GatewayError> {
        let request = self.client.get(&self.url);
        let snapshot = fetch_json(request, "representatives directory", GatewayError::Directory)
            .await?;

        let Some(accounts) = snapshot.as_array() else {
            return Err(GatewayError::InvalidResponse {
                service: "representatives directory",
                reason: "expected a JSON array of accounts".to_string(),
            });
        };
        debug!("Fetched {} recommended representatives", accounts.len());

        self.cache.put_json(RECOMMENDED_REPRESENTATIVES_KEY, &snapshot, Some(self.ttl)).await;
        Ok(snapshot)
    }

    /// The cached snapshot, fetching it synchronously when absent or expired
    pub async fn get(&self) -> Result<Value, GatewayError> {
        if let Some(snapshot) = self.cache.get_json(RECOMMENDED_REPRESENTATIVES_KEY).await {
            return Ok(snapshot);
        }

        debug!("No recommended representatives cached, fetching from {}", self.url);
        self.refresh().await
    }

    /// Starts the periodic refresh
    ///
    /// The first refresh runs immediately. The task ends when `shutdown` fires or its sender
    /// is dropped. A failed refresh is logged and retried on the next tick only.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.refresh().await {
                            Ok(snapshot) => info!(
                                "Refreshed recommended representatives ({} accounts)",
                                snapshot.as_array().map_or(0, Vec::len)
                            ),
                            Err(e) => warn!("Failed to refresh recommended representatives: {}", e),
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Stopping recommended representatives refresher");
                        break;
                    }
                }
            }
        })
    }
}
