//! Coordinator Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the admission coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long a terminal run stays visible before the key returns to idle (ms)
    pub flush_delay_ms: u64,
    /// Store-level expiry for terminal records (ms). Never shorter than the flush delay.
    pub store_ttl_ms: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: 5_000,
            store_ttl_ms: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Defaults to twice the flush delay, clamped up to the flush delay
    pub fn store_ttl(&self) -> Duration {
        let ttl = self
            .store_ttl_ms
            .unwrap_or_else(|| self.flush_delay_ms.saturating_mul(2));
        Duration::from_millis(ttl.max(self.flush_delay_ms))
    }
}
