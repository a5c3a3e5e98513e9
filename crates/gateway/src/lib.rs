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

//! Nodegate Gateway Library
//!
//! A gateway that sits between wallet clients and a ledger node's RPC server. Only a fixed set
//! of actions is let through. Proof-of-work results and the online representatives list are
//! cached, work can be delegated to an external proof-of-work service, and history and block
//! responses are enriched with timestamps from a separate source.

pub mod allowlist;
pub mod cache;
pub mod dpow;
pub mod enrich;
pub mod error;
pub mod health;
pub mod metrics;
pub mod policy;
pub mod proxy;
pub mod reps;
pub mod router;
pub mod singleflight;
pub mod upstream;

pub use cache::{Cache, CacheBackend, CacheBackendKind};
pub use error::GatewayError;
pub use proxy::{GatewayServer, GatewayServerBuilder};
pub use router::NodeRouter;
