//! PostgreSQL run store
//!
//! Uses the `subscription_runs` table from `migrations/`. Events are kept as a
//! JSONB array in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::run_store::{PersistedRun, RunStore};
use crate::coordinator::state::{RunEvent, RunStatus};
use crate::error::{RelayError, Result};

#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Connect a new pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL run store");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Delete records whose safety-net expiry has passed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscription_runs
            WHERE expires_at IS NOT NULL AND expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn generation_to_db(generation: u64) -> Result<i64> {
    i64::try_from(generation)
        .map_err(|_| RelayError::Storage(format!("generation {generation} out of range")))
}

#[async_trait]
impl RunStore for PostgresRunStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn load(&self, subscription_id: &str) -> Result<Option<PersistedRun>> {
        let row = sqlx::query(
            r#"
            SELECT subscription_id, generation, owner, status, started_at, finished_at,
                   error_detail, events, expires_at
            FROM subscription_runs
            WHERE subscription_id = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let status: String = r.get("status");
        let generation: i64 = r.get("generation");
        let events: Json<Vec<RunEvent>> = r.get("events");
        let owner: Uuid = r.get("owner");
        let finished_at: Option<DateTime<Utc>> = r.get("finished_at");
        let expires_at: Option<DateTime<Utc>> = r.get("expires_at");

        Ok(Some(PersistedRun {
            subscription_id: r.get("subscription_id"),
            generation: generation.max(0) as u64,
            owner,
            status: status.parse::<RunStatus>()?,
            started_at: r.get("started_at"),
            finished_at,
            error_detail: r.get("error_detail"),
            events: events.0,
            expires_at,
        }))
    }

    #[instrument(skip(self, run), fields(subscription_id = %run.subscription_id, generation = run.generation))]
    async fn save(&self, run: &PersistedRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_runs (
                subscription_id, generation, owner, status, started_at, finished_at,
                error_detail, events, expires_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (subscription_id) DO UPDATE SET
                generation = EXCLUDED.generation,
                owner = EXCLUDED.owner,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at,
                error_detail = EXCLUDED.error_detail,
                events = EXCLUDED.events,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(&run.subscription_id)
        .bind(generation_to_db(run.generation)?)
        .bind(run.owner)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error_detail)
        .bind(Json(&run.events))
        .bind(run.expires_at)
        .execute(&self.pool)
        .await?;

        debug!(events = run.events.len(), status = %run.status, "saved run record");
        Ok(())
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append_events(
        &self,
        subscription_id: &str,
        generation: u64,
        events: &[RunEvent],
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_runs
            SET events = events || $3, updated_at = NOW()
            WHERE subscription_id = $1 AND generation = $2
            "#,
        )
        .bind(subscription_id)
        .bind(generation_to_db(generation)?)
        .bind(Json(events))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Storage(format!(
                "no stored run {generation} for {subscription_id}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, subscription_id: &str, generation: u64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscription_runs
            WHERE subscription_id = $1 AND generation = $2
            "#,
        )
        .bind(subscription_id)
        .bind(generation_to_db(generation)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::{RunOutcome, SubscriptionRun};
    use serde_json::json;

    #[test]
    fn test_generation_range_check() {
        assert_eq!(generation_to_db(42).unwrap(), 42);
        assert!(generation_to_db(u64::MAX).is_err());
    }

    /// Runs only against a real database: RELAY_TEST_DATABASE_URL=postgres://...
    #[tokio::test]
    async fn test_postgres_round_trip() {
        let Ok(url) = std::env::var("RELAY_TEST_DATABASE_URL") else {
            eprintln!("Skipping postgres test: RELAY_TEST_DATABASE_URL not set");
            return;
        };
        let store = PostgresRunStore::new(&url, 2).await.unwrap();
        store.migrate().await.unwrap();

        let id = format!("it-{}", Uuid::new_v4().simple());
        let mut run = SubscriptionRun::start(&id, 9, Utc::now());
        run.events.append(RunEvent::new("tool_call", json!({"tool": "readBalance"})));
        run.events.append(RunEvent::new("tool_result", json!({"ok": true})));
        run.finish(RunOutcome::Ok, Utc::now());

        let record = PersistedRun::from_run(&run, Uuid::new_v4(), None);
        store.save(&record).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.events.len(), 2);
        assert_eq!(loaded.events[0].event_type, "tool_call");

        store
            .append_events(&id, 9, &[RunEvent::new("agent_message", json!({}))])
            .await
            .unwrap();
        assert!(store.append_events(&id, 8, &[]).await.is_err());
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.events.len(), 3);
        assert_eq!(loaded.events[2].event_type, "agent_message");

        assert!(!store.delete(&id, 8).await.unwrap());
        assert!(store.delete(&id, 9).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_none());
    }
}
