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

//! Per-action request counters

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// Counters for one node action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    /// Requests that passed validation
    pub requests: u64,
    /// Requests answered from cache
    pub cache_hits: u64,
    /// Cacheable requests that missed
    pub cache_misses: u64,
    /// Calls made to a node (primary, work or override)
    pub upstream_calls: u64,
    /// Calls made to the proof-of-work service
    pub delegate_calls: u64,
    /// Requests that shared another request's in-flight result
    pub coalesced: u64,
    /// Requests that ended in an error
    pub errors: u64,
}

impl ActionStats {
    /// Calculate the cache hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / lookups as f64) * 100.0
        }
    }
}

/// Something worth counting about a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    /// A validated request arrived
    Request,
    /// Served from cache
    CacheHit,
    /// Cache consulted without result
    CacheMiss,
    /// A node was called
    UpstreamCall,
    /// The proof-of-work service was called
    DelegateCall,
    /// Joined an in-flight request
    Coalesced,
    /// The request failed
    Error,
}

/// Thread-safe collection of per-action counters
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    actions: RwLock<BTreeMap<String, ActionStats>>,
    rejected: AtomicU64,
}

impl GatewayMetrics {
    /// Creates empty counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `event` against `action`
    pub fn record(&self, action: &str, event: MetricEvent) {
        let mut actions = self.actions.write();
        let stats = actions.entry(action.to_string()).or_default();
        match event {
            MetricEvent::Request => stats.requests += 1,
            MetricEvent::CacheHit => stats.cache_hits += 1,
            MetricEvent::CacheMiss => stats.cache_misses += 1,
            MetricEvent::UpstreamCall => stats.upstream_calls += 1,
            MetricEvent::DelegateCall => stats.delegate_calls += 1,
            MetricEvent::Coalesced => stats.coalesced += 1,
            MetricEvent::Error => stats.errors += 1,
        }
    }

    /// Counts a request refused by validation
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters of one action
    pub fn action(&self, action: &str) -> ActionStats {
        self.actions.read().get(action).cloned().unwrap_or_default()
    }

    /// Number of requests refused by validation
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// All counters as JSON
    pub fn snapshot(&self) -> Value {
        let actions = self.actions.read();
        let per_action: serde_json::Map<String, Value> = actions
            .iter()
            .map(|(action, stats)| {
                let mut value = json!(stats);
                value["hit_rate"] = json!(format!("{:.1}%", stats.hit_rate()));
                (action.clone(), value)
            })
            .collect();

        json!({
            "actions": per_action,
            "total_requests": actions.values().map(|s| s.requests).sum::<u64>(),
            "rejected": self.rejected(),
        })
    }
}
