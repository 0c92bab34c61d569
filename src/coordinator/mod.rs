//! Admission Coordinator
//!
//! Single-flight gatekeeper for subscription runs. Each subscription key gets
//! its own serializing actor, which is the only writer of that key's status
//! and event log. Terminal runs are flushed back to idle after a fixed delay.

pub(crate) mod actor;
pub mod command;
pub mod config;
#[allow(clippy::module_inception)]
pub mod coordinator;
pub mod event_log;
pub mod state;

pub use command::SubscriptionCommand;
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use event_log::EventLog;
pub use state::{RunEvent, RunOutcome, RunSnapshot, RunStatus, RunTicket, SubscriptionRun};
