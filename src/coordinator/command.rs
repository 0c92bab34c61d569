//! Subscription Commands - mailbox messages for a per-key actor

use tokio::sync::oneshot;

use super::state::{RunEvent, RunOutcome, RunSnapshot, RunTicket};
use crate::error::AdmitError;

/// Everything that touches a subscription's run goes through one of these
#[derive(Debug)]
pub enum SubscriptionCommand {
    /// Atomic check-and-set: start a run unless one is already running
    Admit(oneshot::Sender<Result<RunTicket, AdmitError>>),
    /// Append an event to the run named by `generation`
    Emit { generation: u64, event: RunEvent },
    /// Mark the run named by `generation` terminal and start its flush timer
    Complete { generation: u64, outcome: RunOutcome },
    /// Drop the run named by `generation`, returning the key to idle
    Flush { generation: u64 },
    /// Read-only copy of the current state
    Snapshot(oneshot::Sender<RunSnapshot>),
}

impl SubscriptionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admit(_) => "admit",
            Self::Emit { .. } => "emit",
            Self::Complete { .. } => "complete",
            Self::Flush { .. } => "flush",
            Self::Snapshot(_) => "snapshot",
        }
    }
}
