use serde_json::Value;

use crate::coordinator::{CoordinatorHandle, RunEvent, RunTicket};

/// Write side of one admitted run's event log
///
/// Bound to a ticket, so events from a run that has already finished or been
/// superseded are dropped by the coordinator instead of leaking into a newer run.
#[derive(Clone)]
pub struct EventSink {
    coordinator: CoordinatorHandle,
    ticket: RunTicket,
}

impl EventSink {
    pub fn new(coordinator: CoordinatorHandle, ticket: RunTicket) -> Self {
        Self {
            coordinator,
            ticket,
        }
    }

    pub fn emit(&self, event_type: &str, data: Value) {
        self.coordinator
            .emit(&self.ticket, RunEvent::new(event_type, data));
    }
}
