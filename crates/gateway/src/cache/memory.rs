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

//! Bounded in-process work cache

use super::CacheBackend;
use async_trait::async_trait;
use eyre::Result;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};
use tracing::debug;

/// Values indexed by key, plus the keys in insertion order
///
/// Every key in `order` has exactly one value in `values` and vice versa.
#[derive(Default)]
struct Entries {
    order: VecDeque<String>,
    values: HashMap<String, String>,
}

/// Insertion-ordered `(hash, work)` store with FIFO eviction
///
/// This backend never holds an expiring entry: writes that carry a TTL are dropped. It is
/// private to one process and must not be shared between gateway instances.
pub struct MemoryStore {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl MemoryStore {
    /// Creates an empty store holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let preallocated = capacity.min(4096);
        let entries = Entries {
            order: VecDeque::with_capacity(preallocated),
            values: HashMap::with_capacity(preallocated),
        };
        Self { entries: Mutex::new(entries), capacity }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().order.iter().cloned().collect()
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        if ttl.is_some() {
            debug!("Memory cache does not store expiring entries, skipping {}", key);
            return Ok(());
        }

        let mut entries = self.entries.lock();

        // Overwrites keep their original position in the eviction order
        if let Some(slot) = entries.values.get_mut(key) {
            *slot = value;
            return Ok(());
        }

        while entries.order.len() >= self.capacity {
            let Some(evicted) = entries.order.pop_front() else {
                break;
            };
            entries.values.remove(&evicted);
            debug!("Evicted oldest work cache entry: {}", evicted);
        }

        entries.order.push_back(key.to_string());
        entries.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().values.len()
    }
}
