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

//! Key/value cache shared by request handling and the background refresher
//!
//! Two backends implement [`CacheBackend`]:
//! - [`MemoryStore`]: a bounded, insertion-ordered work cache living in this process
//! - [`DiskStore`]: a durable keyed store with per-entry expiry, persisted as JSON
//!
//! Request handling never talks to a backend directly. It goes through [`Cache`], which
//! turns backend failures into misses so that a broken cache never fails a request.

mod disk;
mod memory;

pub use disk::{DiskStore, StoredEntry};
pub use memory::MemoryStore;

use async_trait::async_trait;
use eyre::Result;
use serde_json::Value;
use std::{fmt, path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Cache key holding the last `representatives_online` response
pub const ONLINE_REPRESENTATIVES_KEY: &str = "representatives_online";

/// Cache key holding the recommended representatives snapshot
pub const RECOMMENDED_REPRESENTATIVES_KEY: &str = "recommended_representatives";

/// Prefix of work entries, keeping caller supplied hashes apart from the fixed keys
pub const WORK_KEY_PREFIX: &str = "work:";

/// Cache key of the work computed for `hash`
pub fn work_key(hash: &str) -> String {
    format!("{WORK_KEY_PREFIX}{hash}")
}

/// Storage contract every cache backend satisfies
///
/// A write replaces any prior value for the key. `ttl = None` means the entry lives until
/// evicted (memory) or overwritten (disk).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in logs and the health endpoint
    fn name(&self) -> &'static str;

    /// Returns the live value for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, optionally expiring after `ttl`
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Number of live entries
    async fn len(&self) -> usize;

    /// Persists pending writes; backends without persistence do nothing
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CacheBackendKind {
    /// Bounded in-process FIFO work cache
    #[default]
    Memory,
    /// Durable JSON-file store with native expiry
    Disk,
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
        }
    }
}

impl CacheBackendKind {
    /// Builds the selected backend
    ///
    /// # Arguments
    /// * `capacity` - Entry limit of the memory backend
    /// * `file_path` - Backing file of the disk backend
    pub fn build(self, capacity: usize, file_path: PathBuf) -> Result<Arc<dyn CacheBackend>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStore::new(capacity)),
            Self::Disk => Arc::new(DiskStore::new(file_path)?),
        })
    }
}

/// Best-effort cache service handed to the router and the refresher
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("backend", &self.backend.name()).finish()
    }
}

impl Cache {
    /// Wraps a backend
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// In-process bounded cache, mostly useful in tests
    pub fn memory(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryStore::new(capacity)))
    }

    /// Name of the underlying backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Looks up `key`, treating backend failures as a miss
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Ok(None) => {
                debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                warn!(
                    "Cache backend {} unavailable on read, treating as miss: {}",
                    self.backend_name(),
                    e
                );
                None
            }
        }
    }

    /// Looks up `key` and parses the stored JSON document
    pub async fn get_json(&self, key: &str) -> Option<Value> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring unparsable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Stores `value`, logging and swallowing backend failures
    pub async fn put(&self, key: &str, value: String, ttl: Option<Duration>) {
        if let Err(e) = self.backend.put(key, value, ttl).await {
            warn!("Cache backend {} unavailable on write for {}: {}", self.backend_name(), key, e);
        } else {
            debug!("Cached entry: {} (ttl: {:?})", key, ttl);
        }
    }

    /// Serializes and stores a JSON document
    pub async fn put_json(&self, key: &str, value: &Value, ttl: Option<Duration>) {
        self.put(key, value.to_string(), ttl).await;
    }

    /// Number of live entries in the backend
    pub async fn len(&self) -> usize {
        self.backend.len().await
    }

    /// Whether the backend holds no live entry
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persists the backend, logging failures
    pub async fn flush(&self) {
        if let Err(e) = self.backend.flush().await {
            warn!("Failed to flush {} cache: {}", self.backend_name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails every operation, as an unreachable store would
    struct BrokenBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre::eyre!("connection refused"))
        }

        async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre::eyre!("connection refused"))
        }

        async fn len(&self) -> usize {
            0
        }

        async fn flush(&self) -> Result<()> {
            Err(eyre::eyre!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades_to_miss() {
        nodegate_common::logging::ensure_test_logging(None);

        let backend = Arc::new(BrokenBackend { calls: AtomicUsize::new(0) });
        let cache = Cache::new(backend.clone());

        cache.put("hash", "work".to_string(), None).await;
        assert_eq!(cache.get("hash").await, None);
        assert_eq!(cache.get_json(ONLINE_REPRESENTATIVES_KEY).await, None);
        cache.flush().await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_json_round_trip_and_corrupt_entry() {
        let cache = Cache::memory(4);

        let doc = serde_json::json!({"representatives": {"nano_1abc": "100"}});
        cache.put_json("doc", &doc, None).await;
        assert_eq!(cache.get_json("doc").await, Some(doc));

        cache.put("garbage", "{not json".to_string(), None).await;
        assert_eq!(cache.get("garbage").await.as_deref(), Some("{not json"));
        assert_eq!(cache.get_json("garbage").await, None);
    }

    #[test]
    fn test_backend_kind_build() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = temp_dir.path().join("cache.json");

        assert_eq!(CacheBackendKind::Memory.build(8, file.clone()).unwrap().name(), "memory");
        assert_eq!(CacheBackendKind::Disk.build(8, file).unwrap().name(), "disk");
        assert_eq!(CacheBackendKind::default().to_string(), "memory");
    }
}
