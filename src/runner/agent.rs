//! Agent loop abstraction and the strategy-driven implementation

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::request::RunRequest;
use super::sink::EventSink;
use super::tools::ToolInvoker;
use crate::error::{RelayError, Result};

/// What an agent loop gets to work with for one run
pub struct AgentSession {
    pub sink: EventSink,
    pub tools: ToolInvoker,
}

/// A long-running strategy executor
///
/// Implementations report progress through `session.sink` and call tools
/// only through `session.tools`, which records every call. Returning `Err`
/// (or panicking) fails the run.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run to completion. `Ok` carries a short summary for the final log line.
    async fn run(&self, request: &RunRequest, session: &AgentSession) -> Result<Value>;
}

/// Executes the strategy's planned tool calls in order
pub struct ScriptedAgent {
    step_delay: Duration,
}

impl ScriptedAgent {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl AgentLoop for ScriptedAgent {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, request: &RunRequest, session: &AgentSession) -> Result<Value> {
        let strategy = &request.strategy;
        session.sink.emit(
            "agent_start",
            json!({
                "strategy": strategy.name,
                "strategyId": strategy.id,
                "steps": strategy.steps.len(),
                "delegationWalletId": request.delegation_wallet_id,
                "recentActions": request.recent_actions.len(),
            }),
        );
        info!(
            subscription_id = %request.ticket.subscription_id,
            generation = request.ticket.generation,
            strategy = %strategy.name,
            steps = strategy.steps.len(),
            "agent loop started"
        );

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for (idx, step) in strategy.steps.iter().enumerate() {
            if idx > 0 && !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }

            match session.tools.invoke(step).await {
                Ok(_) => succeeded += 1,
                Err(detail) => {
                    failed += 1;
                    if strategy.halt_on_error {
                        return Err(RelayError::Execution(format!(
                            "step {} ({}) failed: {}",
                            idx + 1,
                            step.name(),
                            detail
                        )));
                    }
                    debug!(step = idx + 1, tool = step.name(), "continuing after failed step");
                }
            }
        }

        let message = if strategy.steps.is_empty() {
            format!("strategy '{}' planned no actions", strategy.name)
        } else {
            format!(
                "strategy '{}' finished: {} of {} actions succeeded",
                strategy.name,
                succeeded,
                strategy.steps.len()
            )
        };
        session.sink.emit(
            "agent_message",
            json!({ "message": message, "succeeded": succeeded, "failed": failed }),
        );

        Ok(json!({ "succeeded": succeeded, "failed": failed }))
    }
}
