//! Run State - status machine, events, and read snapshots for one subscription

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::event_log::EventLog;
use crate::error::RelayError;

/// Lifecycle status of a subscription's run
///
/// `Idle` is what a key with no record reports; it is never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Completed or Error: the run has finished and accepts no more events
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(RelayError::Storage(format!("unknown run status: {other}"))),
        }
    }
}

/// One tagged, timestamped record emitted during a run
///
/// The tag is open: the log never interprets `event_type` or `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Proof of admission, carried by everything that writes into a run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunTicket {
    pub subscription_id: String,
    pub generation: u64,
}

/// Terminal outcome reported by the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Err(String),
}

/// The live record for a subscription key
#[derive(Debug, Clone)]
pub struct SubscriptionRun {
    pub subscription_id: String,
    pub generation: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub events: EventLog,
}

impl SubscriptionRun {
    /// Fresh run in `Running` state with an empty log
    pub fn start(subscription_id: &str, generation: u64, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            generation,
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            error_detail: None,
            events: EventLog::new(),
        }
    }

    pub fn ticket(&self) -> RunTicket {
        RunTicket {
            subscription_id: self.subscription_id.clone(),
            generation: self.generation,
        }
    }

    /// True when `generation` names this run and it still accepts events
    pub fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && self.status == RunStatus::Running
    }

    /// Move to a terminal status. Caller has checked `accepts`.
    pub fn finish(&mut self, outcome: RunOutcome, now: DateTime<Utc>) {
        match outcome {
            RunOutcome::Ok => {
                self.status = RunStatus::Completed;
                self.error_detail = None;
            }
            RunOutcome::Err(detail) => {
                self.status = RunStatus::Error;
                self.error_detail = Some(detail);
            }
        }
        self.finished_at = Some(now);
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            subscription_id: self.subscription_id.clone(),
            generation: Some(self.generation),
            status: self.status,
            started_at: Some(self.started_at),
            finished_at: self.finished_at,
            error_detail: self.error_detail.clone(),
            events: self.events.snapshot(),
        }
    }
}

/// Point-in-time copy of a subscription's state for readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub subscription_id: String,
    pub generation: Option<u64>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub events: Vec<RunEvent>,
}

impl RunSnapshot {
    /// What a key with no record looks like
    pub fn idle(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            generation: None,
            status: RunStatus::Idle,
            started_at: None,
            finished_at: None,
            error_detail: None,
            events: Vec::new(),
        }
    }
}
