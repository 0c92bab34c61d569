//! Run Store contract and the persisted record layout

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::event_log::EventLog;
use crate::coordinator::state::{RunEvent, RunStatus, SubscriptionRun};
use crate::error::Result;

/// One record per subscription key, exactly as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRun {
    pub subscription_id: String,
    pub generation: u64,
    /// Coordinator instance that admitted the run
    pub owner: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub events: Vec<RunEvent>,
    /// Safety-net expiry; unset while the run is live
    pub expires_at: Option<DateTime<Utc>>,
}

impl PersistedRun {
    pub fn from_run(run: &SubscriptionRun, owner: Uuid, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            subscription_id: run.subscription_id.clone(),
            generation: run.generation,
            owner,
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            error_detail: run.error_detail.clone(),
            events: run.events.snapshot(),
            expires_at,
        }
    }

    pub fn into_run(self) -> SubscriptionRun {
        SubscriptionRun {
            subscription_id: self.subscription_id,
            generation: self.generation,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error_detail: self.error_detail,
            events: EventLog::from_events(self.events),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Durable home for run records
///
/// Every key is only ever written by its own coordinator actor, so stores
/// need no compare-and-set beyond the generation check on delete.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Current record for a key; expired records read as absent
    async fn load(&self, subscription_id: &str) -> Result<Option<PersistedRun>>;

    /// Insert or replace the record for `run.subscription_id`
    async fn save(&self, run: &PersistedRun) -> Result<()>;

    /// Append events to the stored log of the run named by `generation`.
    ///
    /// Costs O(events) regardless of how long the stored log already is.
    /// Fails if no record for that generation exists.
    async fn append_events(
        &self,
        subscription_id: &str,
        generation: u64,
        events: &[RunEvent],
    ) -> Result<()>;

    /// Remove the record if it still belongs to `generation`. Returns whether a row went away.
    async fn delete(&self, subscription_id: &str, generation: u64) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_round_trips_run() {
        let now = Utc::now();
        let mut run = SubscriptionRun::start("S1", 3, now);
        run.events.append(RunEvent::new("tool_call", json!({"tool": "transfer"})));

        let owner = Uuid::new_v4();
        let record = PersistedRun::from_run(&run, owner, None);
        assert_eq!(record.owner, owner);
        assert_eq!(record.events.len(), 1);

        let restored = record.into_run();
        assert_eq!(restored.generation, 3);
        assert_eq!(restored.status, RunStatus::Running);
        assert_eq!(restored.events.as_slice(), run.events.as_slice());
    }

    #[test]
    fn test_expiry_only_applies_when_set() {
        let now = Utc::now();
        let run = SubscriptionRun::start("S1", 1, now);
        let live = PersistedRun::from_run(&run, Uuid::new_v4(), None);
        assert!(!live.is_expired(now + chrono::Duration::days(365)));

        let terminal = PersistedRun::from_run(&run, Uuid::new_v4(), Some(now));
        assert!(terminal.is_expired(now));
        assert!(!terminal.is_expired(now - chrono::Duration::seconds(1)));
    }
}
