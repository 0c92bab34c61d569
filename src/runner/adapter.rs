//! Execution Runner Adapter
//!
//! Starts the agent loop for an admitted run without blocking the caller and
//! guarantees exactly one completion report per run, whatever the loop does.

use serde_json::json;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::agent::{AgentLoop, AgentSession};
use super::request::RunRequest;
use super::sink::EventSink;
use super::tools::{ChainTools, ToolContext, ToolInvoker};
use crate::coordinator::{CoordinatorHandle, RunOutcome};

#[derive(Clone)]
pub struct ExecutionRunner {
    coordinator: CoordinatorHandle,
    agent: Arc<dyn AgentLoop>,
    tools: Arc<dyn ChainTools>,
    active: Arc<AtomicUsize>,
}

/// Decrements the active-run counter however the supervising task ends
struct ActiveRun(Arc<AtomicUsize>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl ExecutionRunner {
    pub fn new(
        coordinator: CoordinatorHandle,
        agent: Arc<dyn AgentLoop>,
        tools: Arc<dyn ChainTools>,
    ) -> Self {
        Self {
            coordinator,
            agent,
            tools,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs currently executing in this process
    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn agent_name(&self) -> &'static str {
        self.agent.name()
    }

    /// Start the agent loop for an admitted run and return immediately.
    ///
    /// The loop runs in its own task; a supervising task waits on it and
    /// reports the outcome, so a panic in the loop still completes the run
    /// as an error.
    pub fn launch(&self, request: RunRequest) -> JoinHandle<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveRun(Arc::clone(&self.active));

        let ticket = request.ticket.clone();
        let sink = EventSink::new(self.coordinator.clone(), ticket.clone());
        let ctx = ToolContext {
            subscription_id: ticket.subscription_id.clone(),
            delegation_wallet_id: request.delegation_wallet_id.clone(),
            signer: Arc::new(request.private_key.clone()),
        };
        let session = AgentSession {
            sink: sink.clone(),
            tools: ToolInvoker::new(Arc::clone(&self.tools), ctx, sink.clone()),
        };
        let agent = Arc::clone(&self.agent);
        let coordinator = self.coordinator.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let agent_task = tokio::spawn(async move { agent.run(&request, &session).await });

            let outcome = match agent_task.await {
                Ok(Ok(summary)) => {
                    info!(
                        subscription_id = %ticket.subscription_id,
                        generation = ticket.generation,
                        %summary,
                        "agent loop completed"
                    );
                    RunOutcome::Ok
                }
                Ok(Err(e)) => {
                    warn!(
                        subscription_id = %ticket.subscription_id,
                        generation = ticket.generation,
                        error = %e,
                        "agent loop failed"
                    );
                    RunOutcome::Err(e.to_string())
                }
                Err(join_err) if join_err.is_panic() => {
                    let detail = format!(
                        "agent loop panicked: {}",
                        panic_message(join_err.into_panic().as_ref())
                    );
                    error!(
                        subscription_id = %ticket.subscription_id,
                        generation = ticket.generation,
                        "{}", detail
                    );
                    RunOutcome::Err(detail)
                }
                Err(_) => RunOutcome::Err("agent loop cancelled".to_string()),
            };

            if let RunOutcome::Err(detail) = &outcome {
                sink.emit("error", json!({ "message": detail }));
            }
            coordinator.complete(&ticket, outcome);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, CoordinatorConfig, RunStatus, RunTicket};
    use crate::error::{RelayError, Result};
    use crate::persistence::InMemoryRunStore;
    use crate::runner::request::{SecretKey, StrategySpec};
    use crate::runner::simulated::SimulatedChain;
    use crate::runner::tools::ToolCall;
    use crate::runner::ScriptedAgent;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::time::Duration;

    struct PanickingAgent;

    #[async_trait]
    impl AgentLoop for PanickingAgent {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn run(&self, _request: &RunRequest, session: &AgentSession) -> Result<Value> {
            session.sink.emit("agent_start", json!({}));
            panic!("model returned garbage");
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentLoop for FailingAgent {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _request: &RunRequest, _session: &AgentSession) -> Result<Value> {
            Err(RelayError::Execution("rpc quorum lost".into()))
        }
    }

    fn coordinator() -> CoordinatorHandle {
        Coordinator::new(
            CoordinatorConfig {
                flush_delay_ms: 60_000,
                store_ttl_ms: None,
            },
            Arc::new(InMemoryRunStore::new()),
        )
        .handle()
    }

    fn request(ticket: RunTicket, steps: Vec<ToolCall>) -> RunRequest {
        RunRequest {
            ticket,
            private_key: SecretKey::new("22".repeat(32)),
            strategy: StrategySpec {
                id: None,
                name: "test".into(),
                instructions: String::new(),
                steps,
                halt_on_error: true,
            },
            delegation_wallet_id: "wallet-1".into(),
            recent_actions: Vec::new(),
        }
    }

    fn runner(handle: &CoordinatorHandle, agent: Arc<dyn AgentLoop>) -> ExecutionRunner {
        ExecutionRunner::new(handle.clone(), agent, Arc::new(SimulatedChain::default()))
    }

    #[tokio::test]
    async fn test_successful_run_records_tool_events() {
        let handle = coordinator();
        let runner = runner(&handle, Arc::new(ScriptedAgent::default()));
        let ticket = handle.admit("S1").await.unwrap();

        let steps = vec![ToolCall::ReadBalance {
            chain: "base".into(),
            token: "USDC".into(),
            address: None,
        }];
        runner.launch(request(ticket, steps)).await.unwrap();

        let snap = handle.status("S1").await;
        assert_eq!(snap.status, RunStatus::Completed);
        let types: Vec<&str> = snap.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["agent_start", "tool_call", "tool_result", "agent_message"]
        );
        assert_eq!(snap.events[2].data["output"]["balance"], "1000");
        assert_eq!(runner.active_runs(), 0);
    }

    #[tokio::test]
    async fn test_failed_step_halts_and_fails_run() {
        let handle = coordinator();
        let runner = runner(&handle, Arc::new(ScriptedAgent::default()));
        let ticket = handle.admit("S1").await.unwrap();

        let steps = vec![
            ToolCall::Transfer {
                chain: "base".into(),
                token: "USDC".into(),
                to: "0xbob".into(),
                amount: dec!(5000),
            },
            ToolCall::ReadBalance {
                chain: "base".into(),
                token: "USDC".into(),
                address: None,
            },
        ];
        runner.launch(request(ticket, steps)).await.unwrap();

        let snap = handle.status("S1").await;
        assert_eq!(snap.status, RunStatus::Error);
        assert!(snap
            .error_detail
            .as_deref()
            .unwrap()
            .contains("insufficient balance"));
        let types: Vec<&str> = snap.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["agent_start", "tool_call", "tool_result", "error"]);
        assert_eq!(snap.events[2].data["ok"], false);
    }

    #[tokio::test]
    async fn test_panicking_agent_still_completes_with_error() {
        let handle = coordinator();
        let runner = runner(&handle, Arc::new(PanickingAgent));
        let ticket = handle.admit("S1").await.unwrap();

        runner.launch(request(ticket, Vec::new())).await.unwrap();

        let snap = handle.status("S1").await;
        assert_eq!(snap.status, RunStatus::Error);
        assert!(snap
            .error_detail
            .as_deref()
            .unwrap()
            .contains("model returned garbage"));
        assert_eq!(snap.events.last().unwrap().event_type, "error");
        assert_eq!(runner.active_runs(), 0);

        // Key is no longer running, so a new trigger is admitted
        assert!(handle.admit("S1").await.is_ok());
    }

    #[tokio::test]
    async fn test_agent_error_becomes_error_status() {
        let handle = coordinator();
        let runner = runner(&handle, Arc::new(FailingAgent));
        let ticket = handle.admit("S1").await.unwrap();

        runner.launch(request(ticket, Vec::new())).await.unwrap();

        let snap = handle.status("S1").await;
        assert_eq!(snap.status, RunStatus::Error);
        assert_eq!(
            snap.error_detail.as_deref(),
            Some("Execution failed: rpc quorum lost")
        );
    }

    #[tokio::test]
    async fn test_launch_does_not_block_on_the_loop() {
        let handle = coordinator();
        let runner = runner(&handle, Arc::new(ScriptedAgent::new(Duration::from_millis(200))));
        let ticket = handle.admit("S1").await.unwrap();

        let steps = vec![
            ToolCall::ReadBalance {
                chain: "base".into(),
                token: "USDC".into(),
                address: None,
            };
            3
        ];
        let task = runner.launch(request(ticket, steps));
        assert_eq!(runner.active_runs(), 1);
        assert_eq!(handle.status("S1").await.status, RunStatus::Running);

        task.await.unwrap();
        assert_eq!(handle.status("S1").await.status, RunStatus::Completed);
    }
}
