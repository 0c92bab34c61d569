use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::{RunEvent, RunSnapshot, RunStatus};
use crate::error::{RelayError, Result};
use crate::runner::{SecretKey, StrategySpec};

// ============================================================================
// Trigger Types
// ============================================================================

/// Body of `POST /send`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub private_key: SecretKey,
    pub strategy: StrategySpec,
    pub subscription_id: String,
    pub delegation_wallet_id: String,
    #[serde(default)]
    pub recent_actions: Vec<Value>,
}

impl SendRequest {
    /// Shape checks that must pass before admission is attempted
    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.trim().is_empty() {
            return Err(RelayError::Validation(
                "subscriptionId is required".to_string(),
            ));
        }
        if self.delegation_wallet_id.trim().is_empty() {
            return Err(RelayError::Validation(
                "delegationWalletId is required".to_string(),
            ));
        }
        self.private_key.validate()?;
        self.strategy.validate()
    }
}

/// `{ success, message }`, used for trigger acknowledgements and all errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// ============================================================================
// Polling Types
// ============================================================================

/// Body of `GET /events/:subscriptionId`
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub status: RunStatus,
    pub events: Vec<RunEvent>,
}

impl From<RunSnapshot> for EventsResponse {
    fn from(snapshot: RunSnapshot) -> Self {
        Self {
            status: snapshot.status,
            events: snapshot.events,
        }
    }
}

// ============================================================================
// System Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub active_runs: usize,
    pub live_subscriptions: usize,
    pub store: String,
    pub agent: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "privateKey": format!("0x{}", "ab".repeat(32)),
            "strategy": { "name": "rebalance" },
            "subscriptionId": "S1",
            "delegationWalletId": "wallet-1",
            "recentActions": [{ "kind": "transfer" }]
        })
    }

    #[test]
    fn test_send_request_parses_and_validates() {
        let req: SendRequest = serde_json::from_value(body()).unwrap();
        assert_eq!(req.subscription_id, "S1");
        assert_eq!(req.recent_actions.len(), 1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_send_request_rejects_blank_subscription() {
        let mut raw = body();
        raw["subscriptionId"] = json!(" ");
        let req: SendRequest = serde_json::from_value(raw).unwrap();
        assert!(req.validate().unwrap_err().to_string().contains("subscriptionId"));
    }

    #[test]
    fn test_events_response_shape() {
        let rendered = serde_json::to_value(EventsResponse::from(RunSnapshot::idle("S1"))).unwrap();
        assert_eq!(rendered, json!({ "status": "idle", "events": [] }));
    }
}
