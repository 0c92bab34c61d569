pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod persistence;
pub mod runner;

pub use config::AppConfig;
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
pub use error::{AdmitError, RelayError, Result};
pub use persistence::{InMemoryRunStore, PostgresRunStore, RunStore};
pub use runner::{ExecutionRunner, GatewayChain, ScriptedAgent, SimulatedChain};
