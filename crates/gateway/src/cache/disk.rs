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

//! Durable keyed store with per-entry expiry and JSON persistence

use super::CacheBackend;
use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// A stored value with its write time and optional expiry
///
/// Both timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// The cached value
    pub value: String,
    /// When the value was written
    pub written_at: u64,
    /// When the value stops being served, if ever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let now = now_millis();
        Self {
            value,
            written_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
        }
    }

    /// Whether the entry has expired at `now` (unix milliseconds)
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Durable cache backend
///
/// Entries are served from memory and written to a JSON file on [`CacheBackend::flush`].
/// A flush merges with whatever another gateway instance sharing the same file wrote in the
/// meantime (newest write wins), so several instances can coordinate through one file.
pub struct DiskStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    file_path: PathBuf,
}

impl DiskStore {
    /// Opens the store backed by `file_path`, loading any live entries already on disk
    pub fn new(file_path: PathBuf) -> Result<Self> {
        info!("Using cache file: {}", file_path.display());

        let entries = if file_path.exists() {
            match Self::load(&file_path) {
                Ok(loaded) => {
                    info!("Loaded {} cache entries from disk", loaded.len());
                    loaded
                }
                Err(e) => {
                    warn!("Failed to load cache file, starting with empty cache: {}", e);
                    HashMap::new()
                }
            }
        } else {
            info!("No existing cache file found, starting with empty cache");
            HashMap::new()
        };

        Ok(Self { entries: RwLock::new(entries), file_path })
    }

    /// Path of the backing file
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Reads the backing file, dropping entries that already expired
    fn load(path: &Path) -> Result<HashMap<String, StoredEntry>> {
        let content = fs::read_to_string(path)?;
        let mut entries: HashMap<String, StoredEntry> = serde_json::from_str(&content)?;

        let now = now_millis();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        Ok(entries)
    }

    /// Merges disk and memory entries, newest write winning, expired entries dropped
    fn merge(
        disk: HashMap<String, StoredEntry>,
        memory: HashMap<String, StoredEntry>,
    ) -> HashMap<String, StoredEntry> {
        let mut merged = disk;

        for (key, memory_entry) in memory {
            match merged.get(&key) {
                Some(disk_entry) if disk_entry.written_at > memory_entry.written_at => {}
                _ => {
                    merged.insert(key, memory_entry);
                }
            }
        }

        let now = now_millis();
        merged.retain(|_, entry| !entry.is_expired_at(now));
        merged
    }
}

#[async_trait]
impl CacheBackend for DiskStore {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_millis();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a fresh write raced in between the two locks.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            entries.remove(key);
            debug!("Expired cache entry: {}", key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), StoredEntry::new(value, ttl));
        Ok(())
    }

    async fn len(&self) -> usize {
        let now = now_millis();
        self.entries.read().await.values().filter(|entry| !entry.is_expired_at(now)).count()
    }

    /// Writes the store to disk via temp file + rename
    ///
    /// Entries written to the file by other instances since the last flush are adopted
    /// into memory as well.
    async fn flush(&self) -> Result<()> {
        let existing = match Self::load(&self.file_path) {
            Ok(existing) => existing,
            Err(e) => {
                if self.file_path.exists() {
                    warn!("Failed to load existing cache for merge, using empty: {}", e);
                }
                HashMap::new()
            }
        };
        let disk_size = existing.len();

        let mut entries = self.entries.write().await;
        let memory_size = entries.len();
        let merged = Self::merge(existing, entries.clone());

        // Each flush writes its own temp file, so instances sharing the file never race on it
        let dir = match self.file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp_file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut temp_file, &merged)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&self.file_path).map_err(|e| e.error)?; // Atomic on most filesystems

        info!(
            "Saved {} cache entries to disk (merged from {} disk + {} memory)",
            merged.len(),
            disk_size,
            memory_size
        );

        *entries = merged;
        Ok(())
    }
}
