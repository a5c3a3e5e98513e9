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

//! In-flight request coalescing keyed by cache key

use crate::error::GatewayError;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::broadcast;
use tracing::debug;

type FlightResult = Result<Value, GatewayError>;

struct Flight {
    id: u64,
    tx: broadcast::Sender<FlightResult>,
}

/// Coalesces concurrent calls that would fetch the same uncached key
///
/// The first caller for a key (the leader) runs the fetch; callers arriving while it is in
/// flight wait for and share its result. If the leader is dropped before finishing, waiting
/// callers run the fetch themselves.
#[derive(Default)]
pub struct SingleFlight {
    flights: Mutex<HashMap<String, Flight>>,
    next_id: AtomicU64,
}

/// Whether a call led its flight or joined one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Ran the fetch
    Leader,
    /// Received another call's result
    Follower,
}

/// Removes the leader's flight if it is dropped mid-way
struct LeaderGuard<'a> {
    flights: &'a Mutex<HashMap<String, Flight>>,
    key: &'a str,
    id: u64,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if flights.get(self.key).is_some_and(|flight| flight.id == self.id) {
            flights.remove(self.key);
        }
    }
}

impl SingleFlight {
    /// Creates an empty coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being fetched
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Runs `fetch` for `key` unless an identical fetch is already running
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> (FlightResult, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult>,
    {
        let joined = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(flight) => Err(flight.tx.subscribe()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, _) = broadcast::channel(1);
                    flights.insert(key.to_string(), Flight { id, tx });
                    Ok(id)
                }
            }
        };

        match joined {
            Ok(id) => {
                let _guard = LeaderGuard { flights: &self.flights, key, id };
                let result = fetch().await;

                let flight = {
                    let mut flights = self.flights.lock();
                    match flights.get(key) {
                        Some(flight) if flight.id == id => flights.remove(key),
                        _ => None,
                    }
                };
                if let Some(flight) = flight {
                    // No receivers is fine: nobody joined this flight.
                    let _ = flight.tx.send(result.clone());
                }

                (result, FlightRole::Leader)
            }
            Err(mut rx) => match rx.recv().await {
                Ok(result) => {
                    debug!("Coalesced request for {}", key);
                    (result, FlightRole::Follower)
                }
                Err(_) => {
                    debug!("Flight for {} was abandoned, fetching directly", key);
                    (fetch().await, FlightRole::Leader)
                }
            },
        }
    }
}
