//! Event Log - append-only, insertion-ordered events of one run
//!
//! Owned by the subscription actor; never shared directly between tasks.

use serde::{Deserialize, Serialize};

use super::state::RunEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<RunEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events, keeping their order
    pub fn from_events(events: Vec<RunEvent>) -> Self {
        Self { events }
    }

    pub fn append(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    /// Full ordered copy; the log itself is untouched
    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.events.clone()
    }

    pub fn as_slice(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Only called when a run is flushed
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
