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

//! Node RPC actions the gateway is willing to forward

use crate::error::GatewayError;
use serde_json::Value;

/// Node RPC actions that may pass through the gateway
pub const ALLOWED_ACTIONS: &[&str] = &[
    "account_history",
    "account_info",
    "accounts_frontiers",
    "accounts_balances",
    "accounts_pending",
    "block",
    "blocks",
    "block_count",
    "blocks_info",
    "delegators_count",
    "pending",
    "process",
    "representatives_online",
    "validate_account_number",
    "work_generate",
];

/// Whether `action` is on the allowlist
pub fn is_allowed(action: &str) -> bool {
    ALLOWED_ACTIONS.contains(&action)
}

/// Extracts the action of a request body and checks it against the allowlist
///
/// # Returns
/// The action name, or a validation error when it is absent or not allowed
pub fn validate_action(body: &Value) -> Result<&str, GatewayError> {
    let action = body.get("action").and_then(Value::as_str).ok_or(GatewayError::MissingAction)?;

    if is_allowed(action) {
        Ok(action)
    } else {
        Err(GatewayError::InvalidAction(action.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_listed_action_is_accepted() {
        for action in ALLOWED_ACTIONS {
            let body = json!({ "action": action });
            assert_eq!(validate_action(&body), Ok(*action));
        }
        assert_eq!(ALLOWED_ACTIONS.len(), 15);
    }

    #[test]
    fn test_rejections() {
        let invalid = |action: &str| GatewayError::InvalidAction(action.to_string());
        let cases = vec![
            (json!({"action": "delete_account"}), invalid("delete_account")),
            (json!({"action": "wallet_create"}), invalid("wallet_create")),
            (json!({"action": "Account_History"}), invalid("Account_History")),
            (json!({"action": 42}), GatewayError::MissingAction),
            (json!({"hash": "ABCD"}), GatewayError::MissingAction),
            (json!("work_generate"), GatewayError::MissingAction),
        ];

        for (body, expected) in cases {
            assert_eq!(validate_action(&body), Err(expected), "Failed for body: {body}");
        }
    }
}
