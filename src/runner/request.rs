//! Run parameters handed from the trigger request to the agent loop

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::tools::ToolCall;
use crate::coordinator::RunTicket;
use crate::error::{RelayError, Result};

/// Signing key supplied with a trigger
///
/// # Security
/// Never printed; the backing string is zeroized when dropped.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Require 32 bytes of hex, with or without a `0x` prefix
    pub fn validate(&self) -> Result<()> {
        let key_hex = self.0.trim().trim_start_matches("0x");
        let mut bytes = hex::decode(key_hex)
            .map_err(|_| RelayError::Validation("privateKey must be hex encoded".to_string()))?;
        let len = bytes.len();
        bytes.zeroize();
        if len != 32 {
            return Err(RelayError::Validation(format!(
                "privateKey must be 32 bytes, got {len}"
            )));
        }
        Ok(())
    }

    /// Raw key for a signer. Do not log.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

fn default_halt_on_error() -> bool {
    true
}

/// What the agent should do for this subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    /// Planned tool invocations, executed in order
    #[serde(default)]
    pub steps: Vec<ToolCall>,
    /// Stop at the first failed tool call and fail the run
    #[serde(default = "default_halt_on_error")]
    pub halt_on_error: bool,
}

impl StrategySpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Validation("strategy.name is required".to_string()));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| RelayError::Validation(format!("strategy.steps[{idx}]: {e}")))?;
        }
        Ok(())
    }
}

/// Everything the runner needs for one admitted run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub ticket: RunTicket,
    pub private_key: SecretKey,
    pub strategy: StrategySpec,
    pub delegation_wallet_id: String,
    pub recent_actions: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_secret_key_validation() {
        assert!(SecretKey::new(KEY).validate().is_ok());
        assert!(SecretKey::new(KEY.trim_start_matches("0x")).validate().is_ok());
        assert!(SecretKey::new("0x1234").validate().is_err());
        assert!(SecretKey::new("not-hex").validate().is_err());
    }

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let rendered = format!("{:?}", SecretKey::new(KEY));
        assert!(!rendered.contains("4c0883"));
    }

    #[test]
    fn test_strategy_deserializes_with_defaults() {
        let strategy: StrategySpec = serde_json::from_value(json!({
            "name": "rebalance",
            "steps": [
                { "tool": "readBalance", "chain": "base", "token": "USDC" }
            ]
        }))
        .unwrap();
        assert!(strategy.halt_on_error);
        assert_eq!(strategy.steps.len(), 1);
        assert!(strategy.validate().is_ok());
    }

    #[test]
    fn test_strategy_requires_name() {
        let strategy: StrategySpec = serde_json::from_value(json!({ "name": "  " })).unwrap();
        assert!(strategy.validate().is_err());
    }
}
