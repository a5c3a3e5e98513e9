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

//! Error envelope returned to gateway callers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors that terminate a single gateway request
///
/// Every variant is rendered as `{"error": "<message>"}`. Validation failures map to
/// `400 Bad Request`, failures of an external service to `502 Bad Gateway`.
///
/// The type is `Clone` so that one upstream failure can be handed to every request
/// coalesced behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request body carried no string `action`
    #[error("Action is required")]
    MissingAction,
    /// The action is not on the allowlist
    #[error("Action {0} is not allowed")]
    InvalidAction(String),
    /// The request body is not a JSON document
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    /// A parameter the action needs was not supplied
    #[error("Missing required parameter {param} for {action}")]
    MissingParam {
        /// Action being processed
        action: String,
        /// Name of the absent parameter
        param: &'static str,
    },
    /// The ledger or work node could not be reached or answered with a non-success status
    #[error("Upstream node error: {0}")]
    Upstream(String),
    /// The proof-of-work delegate failed to produce work
    #[error("Proof-of-work delegate error: {0}")]
    Delegate(String),
    /// The recommended-representatives directory could not be fetched
    #[error("Representatives directory error: {0}")]
    Directory(String),
    /// An external service answered with a body that is not the expected JSON
    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse {
        /// Service that produced the body
        service: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

impl GatewayError {
    /// Whether the caller, rather than an external service, is at fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingAction
                | Self::InvalidAction(_)
                | Self::InvalidBody(_)
                | Self::MissingParam { .. }
        )
    }

    /// HTTP status used when rendering this error
    pub fn status_code(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
