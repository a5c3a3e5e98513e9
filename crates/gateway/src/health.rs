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

//! Health check service for gateway status

use crate::cache::Cache;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Reports liveness, uptime and cache state
pub struct HealthService {
    started_at: DateTime<Utc>,
    cache: Cache,
}

impl HealthService {
    /// Creates a health service, recording now as the start time
    pub fn new(cache: Cache) -> Self {
        Self { started_at: Utc::now(), cache }
    }

    /// Status, version, uptime and cache summary
    pub async fn status(&self) -> Value {
        let uptime = Utc::now().signed_duration_since(self.started_at).num_seconds().max(0);

        json!({
            "status": "ok",
            "service": "nodegate",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": uptime,
            "started_at": self.started_at.to_rfc3339(),
            "pid": std::process::id(),
            "cache_backend": self.cache.backend_name(),
            "cache_entries": self.cache.len().await,
        })
    }
}
