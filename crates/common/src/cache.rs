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

//! Cache location utilities.

use std::{fs, path::PathBuf};

use eyre::Result;

/// File name of the durable gateway cache inside the cache directory.
pub const GATEWAY_CACHE_FILE: &str = "gateway.json";

/// Trait for cache paths.
pub trait CachePath {
    /// Returns the path to nodegate's cache dir: `~/.nodegate/cache` by default.
    fn nodegate_cache_dir(&self) -> Option<PathBuf>;

    /// Check whether the cache is valid.
    fn is_valid(&self) -> bool {
        self.nodegate_cache_dir().is_some()
    }

    /// Returns the path to the durable gateway cache file: `<cache_root>/gateway.json`.
    fn gateway_cache_file(&self) -> Option<PathBuf> {
        Some(self.nodegate_cache_dir()?.join(GATEWAY_CACHE_FILE))
    }
}

/// Cache path for nodegate.
#[derive(Debug)]
pub struct NodegateCachePath {
    root: Option<PathBuf>,
}

impl Default for NodegateCachePath {
    fn default() -> Self {
        Self { root: dirs_next::home_dir().map(|p| p.join(".nodegate").join("cache")) }
    }
}

impl NodegateCachePath {
    /// New cache path, falling back to `~/.nodegate/cache` when `root` is `None`.
    pub fn new(root: Option<impl Into<PathBuf>>) -> Self {
        match root {
            Some(root) => Self { root: Some(root.into()) },
            None => Self::default(),
        }
    }

    /// Resolves the durable cache file and creates its parent directory.
    ///
    /// An explicit `file` wins over the cache root. Without either, the current
    /// directory is used.
    pub fn resolve_file(&self, file: Option<PathBuf>) -> Result<PathBuf> {
        let path = file
            .or_else(|| self.gateway_cache_file())
            .unwrap_or_else(|| PathBuf::from(GATEWAY_CACHE_FILE));

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(path)
    }
}

impl CachePath for NodegateCachePath {
    fn nodegate_cache_dir(&self) -> Option<PathBuf> {
        self.root.clone()
    }
}
