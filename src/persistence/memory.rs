//! In-memory run store backed by a sharded map

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::run_store::{PersistedRun, RunStore};
use crate::coordinator::state::RunEvent;
use crate::error::{RelayError, Result};

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: DashMap<String, PersistedRun>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record whose expiry has passed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, subscription_id: &str) -> Result<Option<PersistedRun>> {
        let now = Utc::now();
        let expired = match self.records.get(subscription_id) {
            None => return Ok(None),
            Some(record) if !record.is_expired(now) => return Ok(Some(record.clone())),
            Some(record) => record.generation,
        };

        debug!(subscription_id, generation = expired, "dropping expired run record");
        self.records
            .remove_if(subscription_id, |_, record| record.generation == expired);
        Ok(None)
    }

    async fn save(&self, run: &PersistedRun) -> Result<()> {
        self.records
            .insert(run.subscription_id.clone(), run.clone());
        Ok(())
    }

    async fn append_events(
        &self,
        subscription_id: &str,
        generation: u64,
        events: &[RunEvent],
    ) -> Result<()> {
        match self.records.get_mut(subscription_id) {
            Some(mut record) if record.generation == generation => {
                record.events.extend_from_slice(events);
                Ok(())
            }
            _ => Err(RelayError::Storage(format!(
                "no stored run {generation} for {subscription_id}"
            ))),
        }
    }

    async fn delete(&self, subscription_id: &str, generation: u64) -> Result<bool> {
        Ok(self
            .records
            .remove_if(subscription_id, |_, record| record.generation == generation)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::SubscriptionRun;
    use uuid::Uuid;

    fn record(id: &str, generation: u64) -> PersistedRun {
        let run = SubscriptionRun::start(id, generation, Utc::now());
        PersistedRun::from_run(&run, Uuid::new_v4(), None)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryRunStore::new();
        assert!(store.load("S1").await.unwrap().is_none());

        store.save(&record("S1", 1)).await.unwrap();
        let loaded = store.load("S1").await.unwrap().unwrap();
        assert_eq!(loaded.generation, 1);
    }

    #[tokio::test]
    async fn test_delete_requires_matching_generation() {
        let store = InMemoryRunStore::new();
        store.save(&record("S1", 2)).await.unwrap();

        assert!(!store.delete("S1", 1).await.unwrap());
        assert!(store.load("S1").await.unwrap().is_some());

        assert!(store.delete("S1", 2).await.unwrap());
        assert!(store.load("S1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_events_extends_matching_generation_only() {
        let store = InMemoryRunStore::new();
        store.save(&record("S1", 4)).await.unwrap();

        let batch = vec![
            RunEvent::new("tool_call", serde_json::json!({ "n": 1 })),
            RunEvent::new("tool_result", serde_json::json!({ "n": 2 })),
        ];
        store.append_events("S1", 4, &batch).await.unwrap();
        store.append_events("S1", 4, &batch[..1]).await.unwrap();
        assert!(store.append_events("S1", 3, &batch).await.is_err());
        assert!(store.append_events("missing", 4, &batch).await.is_err());

        let loaded = store.load("S1").await.unwrap().unwrap();
        let types: Vec<&str> = loaded.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["tool_call", "tool_result", "tool_call"]);
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let store = InMemoryRunStore::new();
        let mut expired = record("S1", 1);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.save(&expired).await.unwrap();

        assert!(store.load("S1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired_keeps_live_records() {
        let store = InMemoryRunStore::new();
        let mut expired = record("old", 1);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.records.insert("old".into(), expired);
        store.records.insert("live".into(), record("live", 2));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
