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

//! Cache policies for `work_generate` and `representatives_online`

use crate::{
    cache::{work_key, Cache, ONLINE_REPRESENTATIVES_KEY},
    error::GatewayError,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// How long a `representatives_online` response is served from cache
pub const ONLINE_REPRESENTATIVES_TTL: Duration = Duration::from_secs(5 * 60);

/// Whether an upstream body may be written to the cache
///
/// Node errors arrive as `200 OK` with an `error` field; those are relayed but never cached.
pub fn is_cacheable_response(response: &Value) -> bool {
    response.is_object() && response.get("error").is_none()
}

/// Work results keyed by block hash, kept without expiry
///
/// Entries live under [`work_key`], so no hash can collide with the fixed cache keys.
#[derive(Debug, Clone)]
pub struct WorkCachePolicy {
    cache: Cache,
}

impl WorkCachePolicy {
    /// Creates the policy on top of the shared cache
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// The `hash` parameter of a `work_generate` body
    pub fn hash_param(body: &Value) -> Result<&str, GatewayError> {
        body.get("hash")
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| GatewayError::MissingParam {
                action: "work_generate".to_string(),
                param: "hash",
            })
    }

    /// Cached work for `hash`, shaped as a node `work_generate` response
    pub async fn lookup(&self, hash: &str) -> Option<Value> {
        self.cache.get(&work_key(hash)).await.map(|work| json!({ "work": work }))
    }

    /// Stores the `work` value of a response under `hash`
    ///
    /// # Returns
    /// Whether anything was cached
    pub async fn store(&self, hash: &str, response: &Value) -> bool {
        if !is_cacheable_response(response) {
            return false;
        }

        match response.get("work").and_then(Value::as_str) {
            Some(work) => {
                self.cache.put(&work_key(hash), work.to_string(), None).await;
                true
            }
            None => {
                debug!("Work response for {} carries no work value, not caching", hash);
                false
            }
        }
    }
}

/// Short-lived cache of the online representatives list
#[derive(Debug, Clone)]
pub struct RepresentativesCachePolicy {
    cache: Cache,
    ttl: Duration,
}

impl RepresentativesCachePolicy {
    /// Creates the policy with the default five minute freshness window
    pub fn new(cache: Cache) -> Self {
        Self { cache, ttl: ONLINE_REPRESENTATIVES_TTL }
    }

    /// Overrides the freshness window
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Freshness window of cached responses
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached response, verbatim
    pub async fn lookup(&self) -> Option<Value> {
        self.cache.get_json(ONLINE_REPRESENTATIVES_KEY).await
    }

    /// Caches a full upstream response
    ///
    /// # Returns
    /// Whether the response was cacheable
    pub async fn store(&self, response: &Value) -> bool {
        if !is_cacheable_response(response) {
            return false;
        }

        self.cache.put_json(ONLINE_REPRESENTATIVES_KEY, response, Some(self.ttl)).await;
        true
    }
}
