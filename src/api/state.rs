use chrono::{DateTime, Utc};

use crate::coordinator::CoordinatorHandle;
use crate::runner::ExecutionRunner;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Admission and run state for every subscription key
    pub coordinator: CoordinatorHandle,

    /// Starts agent loops for admitted runs
    pub runner: ExecutionRunner,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: CoordinatorHandle, runner: ExecutionRunner) -> Self {
        Self {
            coordinator,
            runner,
            start_time: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
