//! Execution Runner
//!
//! Bridges an admitted run to the agent loop: spawns it detached, hands it an
//! event sink and a recorded tool set, and reports exactly one outcome back
//! to the coordinator.

pub mod adapter;
pub mod agent;
pub mod gateway;
pub mod request;
pub mod simulated;
pub mod sink;
pub mod tools;

pub use adapter::ExecutionRunner;
pub use agent::{AgentLoop, AgentSession, ScriptedAgent};
pub use gateway::GatewayChain;
pub use request::{RunRequest, SecretKey, StrategySpec};
pub use simulated::SimulatedChain;
pub use sink::EventSink;
pub use tools::{ChainTools, ToolCall, ToolContext, ToolInvoker};
