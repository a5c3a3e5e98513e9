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

//! Nodegate Common - Shared functionality for nodegate components
//!
//! This crate provides the pieces used by both the gateway binary and its tests:
//! logging setup, environment variable names and on-disk data locations.

/// Data directory helpers for the durable cache file
pub mod cache;
/// Environment variable names read by the gateway binary
pub mod env;
/// Logging setup and utilities for consistent logging across nodegate components
pub mod logging;

pub use cache::*;
pub use logging::*;
