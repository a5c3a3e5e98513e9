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

//! Environment variable name constants for gateway configuration.
//!
//! Every command line flag of the `nodegate` binary can also be supplied through one of
//! these variables (or a `.env` file). They are read once at startup.
//!
//! # Environment Variables
//!
//! ## Network
//! - [`NODEGATE_HOST`], [`NODEGATE_PORT`]
//! - [`NODEGATE_NODE_URL`], [`NODEGATE_WORK_URL`]
//!
//! ## Cache
//! - [`NODEGATE_CACHE_BACKEND`], [`NODEGATE_CACHE_CAPACITY`]
//! - [`NODEGATE_CACHE_FILE`], [`NODEGATE_CACHE_SAVE_INTERVAL`]
//!
//! ## Proof-of-work delegate
//! - [`NODEGATE_DPOW`], [`NODEGATE_DPOW_URL`], [`NODEGATE_DPOW_USER`], [`NODEGATE_DPOW_KEY`]
//!
//! ## External sources
//! - [`NODEGATE_REPS_URL`], [`NODEGATE_TIMESTAMPS_URL`]

/// Address the HTTP server binds to.
pub const NODEGATE_HOST: &str = "NODEGATE_HOST";

/// Port the HTTP server listens on.
pub const NODEGATE_PORT: &str = "NODEGATE_PORT";

/// Primary ledger node RPC endpoint.
pub const NODEGATE_NODE_URL: &str = "NODEGATE_NODE_URL";

/// Secondary endpoint used for `work_generate` and `representatives_online`.
///
/// Falls back to [`NODEGATE_NODE_URL`] when unset.
pub const NODEGATE_WORK_URL: &str = "NODEGATE_WORK_URL";

/// Cache backend selector: `memory` or `disk`.
pub const NODEGATE_CACHE_BACKEND: &str = "NODEGATE_CACHE_BACKEND";

/// Maximum number of entries kept by the in-memory work cache.
pub const NODEGATE_CACHE_CAPACITY: &str = "NODEGATE_CACHE_CAPACITY";

/// Location of the durable cache file used by the `disk` backend.
pub const NODEGATE_CACHE_FILE: &str = "NODEGATE_CACHE_FILE";

/// Minutes between durable cache flushes (0 = only on shutdown).
pub const NODEGATE_CACHE_SAVE_INTERVAL: &str = "NODEGATE_CACHE_SAVE_INTERVAL";

/// Enables the external proof-of-work delegate.
pub const NODEGATE_DPOW: &str = "NODEGATE_DPOW";

/// Endpoint of the proof-of-work delegate.
pub const NODEGATE_DPOW_URL: &str = "NODEGATE_DPOW_URL";

/// Account name presented to the proof-of-work delegate.
pub const NODEGATE_DPOW_USER: &str = "NODEGATE_DPOW_USER";

/// API key presented to the proof-of-work delegate.
pub const NODEGATE_DPOW_KEY: &str = "NODEGATE_DPOW_KEY";

/// Directory service listing recommended representatives.
pub const NODEGATE_REPS_URL: &str = "NODEGATE_REPS_URL";

/// Timestamp service used to enrich history, pending and block responses.
pub const NODEGATE_TIMESTAMPS_URL: &str = "NODEGATE_TIMESTAMPS_URL";
