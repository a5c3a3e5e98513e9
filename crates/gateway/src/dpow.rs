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

//! Client for the external distributed proof-of-work service

use crate::{error::GatewayError, upstream::fetch_json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Default endpoint of the proof-of-work service
pub const DEFAULT_DPOW_URL: &str = "https://dpow.nanocenter.org/service/";

/// Seconds the service is asked to spend before giving up, sent with every request
pub const DPOW_TIMEOUT_HINT_SECS: u64 = 10;

/// Credentials and endpoint of the proof-of-work service
#[derive(Clone)]
pub struct DpowConfig {
    /// Service endpoint
    pub url: String,
    /// Account name
    pub user: String,
    /// API key
    pub api_key: String,
}

impl std::fmt::Debug for DpowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpowConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct WorkRequest<'a> {
    user: &'a str,
    api_key: &'a str,
    hash: &'a str,
    timeout: u64,
}

/// Sends `work_generate` requests to the proof-of-work service
///
/// There is no retry and no fallback to the work node: when the service is enabled it is the
/// only source of work.
pub struct DpowClient {
    client: reqwest::Client,
    config: DpowConfig,
}

impl DpowClient {
    /// Creates a client with the shared HTTP client
    pub fn new(client: reqwest::Client, config: DpowConfig) -> Self {
        Self { client, config }
    }

    /// Service endpoint
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Requests work for `hash`
    ///
    /// # Returns
    /// `{"work": ...}` shaped like a node `work_generate` response
    pub async fn work_generate(&self, hash: &str) -> Result<Value, GatewayError> {
        debug!("Requesting work for {} from {}", hash, self.config.url);

        let body = WorkRequest {
            user: &self.config.user,
            api_key: &self.config.api_key,
            hash,
            timeout: DPOW_TIMEOUT_HINT_SECS,
        };
        let request = self.client.post(&self.config.url).json(&body);
        let response = fetch_json(request, "proof-of-work service", GatewayError::Delegate).await?;

        if let Some(error) = response.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            warn!("Proof-of-work service refused {}: {}", hash, message);
            return Err(GatewayError::Delegate(message));
        }

        match response.get("work").and_then(Value::as_str) {
            Some(work) => Ok(json!({ "work": work })),
            None => Err(GatewayError::Delegate("response carries no work value".to_string())),
        }
    }
}
