//! Subscription Actor - serializes every operation on one subscription key
//!
//! One actor exists per key that is currently referenced. It owns the key's
//! `SubscriptionRun` outright; all reads and writes arrive through its mailbox
//! and are handled strictly one at a time. Actors retire once the key is idle
//! and the mailbox is empty, and are recreated from the store on next use.
//!
//! Store writes stay off the per-event path: emitted events are buffered and
//! appended in one batch whenever the mailbox drains.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::command::SubscriptionCommand;
use super::coordinator::CoordinatorShared;
use super::state::{RunEvent, RunOutcome, RunSnapshot, RunStatus, RunTicket, SubscriptionRun};
use crate::error::AdmitError;
use crate::persistence::PersistedRun;

const ORPHANED_RUN_DETAIL: &str = "run orphaned by coordinator restart";

/// Largest batch handed to `RunStore::append_events` in one call
const MAX_APPEND_BATCH: usize = 256;

pub(crate) struct SubscriptionActor {
    subscription_id: String,
    actor_id: u64,
    shared: Arc<CoordinatorShared>,
    run: Option<SubscriptionRun>,
    /// Events appended in memory but not yet written to the store
    pending: Vec<RunEvent>,
    loaded: bool,
    /// Own mailbox, used by flush timers
    self_tx: mpsc::UnboundedSender<SubscriptionCommand>,
    rx: mpsc::UnboundedReceiver<SubscriptionCommand>,
}

impl SubscriptionActor {
    pub(crate) fn new(
        subscription_id: String,
        actor_id: u64,
        shared: Arc<CoordinatorShared>,
        self_tx: mpsc::UnboundedSender<SubscriptionCommand>,
        rx: mpsc::UnboundedReceiver<SubscriptionCommand>,
    ) -> Self {
        Self {
            subscription_id,
            actor_id,
            shared,
            run: None,
            pending: Vec::new(),
            loaded: false,
            self_tx,
            rx,
        }
    }

    /// Mailbox loop. Returns once the actor has removed itself from the registry.
    pub(crate) async fn run(mut self) {
        self.load().await;

        loop {
            if self.run.is_none() && self.try_retire() {
                debug!(subscription_id = %self.subscription_id, actor_id = self.actor_id, "subscription actor retired");
                return;
            }

            if !self.pending.is_empty()
                && (self.rx.is_empty() || self.pending.len() >= MAX_APPEND_BATCH)
            {
                self.write_pending().await;
            }

            let Some(cmd) = self.rx.recv().await else {
                // all senders gone
                return;
            };
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: SubscriptionCommand) {
        match cmd {
            SubscriptionCommand::Admit(reply) => {
                let result = self.admit().await;
                let _ = reply.send(result);
            }
            SubscriptionCommand::Emit { generation, event } => self.emit(generation, event).await,
            SubscriptionCommand::Complete {
                generation,
                outcome,
            } => self.complete(generation, outcome).await,
            SubscriptionCommand::Flush { generation } => self.flush(generation).await,
            SubscriptionCommand::Snapshot(reply) => {
                if !self.loaded {
                    self.load().await;
                }
                let snapshot = match &self.run {
                    Some(run) => run.snapshot(),
                    None => RunSnapshot::idle(&self.subscription_id),
                };
                let _ = reply.send(snapshot);
            }
        }
    }

    /// Remove this actor from the registry if nothing is queued.
    ///
    /// Senders enqueue while holding the registry entry, so an empty mailbox
    /// observed under that same entry lock stays empty.
    fn try_retire(&self) -> bool {
        self.shared
            .actors
            .remove_if(&self.subscription_id, |_, slot| {
                slot.actor_id == self.actor_id && self.rx.is_empty()
            })
            .is_some()
    }

    async fn load(&mut self) {
        match self.shared.store.load(&self.subscription_id).await {
            Ok(Some(record)) => {
                self.loaded = true;
                self.restore(record).await;
            }
            Ok(None) => {
                self.loaded = true;
            }
            Err(e) => {
                warn!(
                    subscription_id = %self.subscription_id,
                    store = self.shared.store.name(),
                    error = %e,
                    "failed to load run record; key treated as idle until the store recovers"
                );
            }
        }
    }

    async fn restore(&mut self, record: PersistedRun) {
        self.shared.observe_generation(record.generation);

        if self.is_flushed(record.generation).await {
            return;
        }

        let owner = record.owner;
        let mut run = record.into_run();

        match run.status {
            RunStatus::Idle => {
                debug!(subscription_id = %self.subscription_id, "ignoring stored idle record");
            }
            RunStatus::Running => {
                // Actors never retire while their run is live, so a fresh actor
                // finding a running record means nothing here is executing it.
                warn!(
                    subscription_id = %self.subscription_id,
                    generation = run.generation,
                    %owner,
                    same_instance = owner == self.shared.instance_id,
                    "found running record with no live runner; marking it failed"
                );
                run.events.append(RunEvent::new(
                    "error",
                    serde_json::json!({ "message": ORPHANED_RUN_DETAIL }),
                ));
                run.finish(RunOutcome::Err(ORPHANED_RUN_DETAIL.to_string()), Utc::now());
                let generation = run.generation;
                self.run = Some(run);
                self.persist().await;
                self.schedule_flush(generation, self.shared.config.flush_delay());
            }
            RunStatus::Completed | RunStatus::Error => {
                let elapsed = run
                    .finished_at
                    .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
                    .unwrap_or_default();
                let remaining = self.shared.config.flush_delay().saturating_sub(elapsed);
                let generation = run.generation;
                self.run = Some(run);
                self.schedule_flush(generation, remaining);
            }
        }
    }

    /// True if `generation` was already flushed here but its record survived
    /// a failed delete. Retries the delete.
    async fn is_flushed(&self, generation: u64) -> bool {
        let tombstone = self
            .shared
            .flushed
            .get(&self.subscription_id)
            .map(|g| *g);
        let Some(flushed) = tombstone.filter(|flushed| generation <= *flushed) else {
            return false;
        };

        match self.shared.store.delete(&self.subscription_id, generation).await {
            Ok(_) => {
                self.shared
                    .flushed
                    .remove_if(&self.subscription_id, |_, g| *g == flushed);
                debug!(subscription_id = %self.subscription_id, generation, "stale record of a flushed run deleted");
            }
            Err(e) => {
                warn!(
                    subscription_id = %self.subscription_id,
                    generation,
                    error = %e,
                    "stale record of a flushed run still present; ignoring it"
                );
            }
        }
        true
    }

    async fn admit(&mut self) -> Result<RunTicket, AdmitError> {
        if !self.loaded {
            self.load().await;
            if !self.loaded {
                return Err(AdmitError::Unavailable(format!(
                    "run store '{}' unreachable",
                    self.shared.store.name()
                )));
            }
        }

        if let Some(current) = &self.run {
            if current.status == RunStatus::Running {
                debug!(
                    subscription_id = %self.subscription_id,
                    generation = current.generation,
                    "admission rejected: run in progress"
                );
                return Err(AdmitError::Conflict);
            }
        }

        let generation = self.shared.next_generation();
        let run = SubscriptionRun::start(&self.subscription_id, generation, Utc::now());
        let record = PersistedRun::from_run(&run, self.shared.instance_id, None);
        if let Err(e) = self.shared.store.save(&record).await {
            warn!(
                subscription_id = %self.subscription_id,
                error = %e,
                "admission failed closed: run store write failed"
            );
            return Err(AdmitError::Unavailable(e.to_string()));
        }

        // The save replaced any record an earlier flush failed to delete
        self.shared.flushed.remove(&self.subscription_id);

        let ticket = run.ticket();
        self.run = Some(run);
        self.pending.clear();
        info!(subscription_id = %self.subscription_id, generation, "run admitted");
        Ok(ticket)
    }

    async fn emit(&mut self, generation: u64, event: RunEvent) {
        let Some(run) = self.run.as_mut().filter(|run| run.accepts(generation)) else {
            warn!(
                subscription_id = %self.subscription_id,
                generation,
                event_type = %event.event_type,
                "dropping event for a run that is not running"
            );
            return;
        };

        debug!(
            subscription_id = %self.subscription_id,
            generation,
            event_type = %event.event_type,
            seq = run.events.len(),
            "event appended"
        );
        run.events.append(event.clone());
        self.pending.push(event);
    }

    /// Write buffered events with one append. On failure the in-memory log
    /// stays authoritative and the full save at completion catches the store up.
    async fn write_pending(&mut self) {
        let Some(run) = &self.run else {
            self.pending.clear();
            return;
        };
        let generation = run.generation;
        let batch = std::mem::take(&mut self.pending);
        if let Err(e) = self
            .shared
            .store
            .append_events(&self.subscription_id, generation, &batch)
            .await
        {
            warn!(
                subscription_id = %self.subscription_id,
                generation,
                events = batch.len(),
                error = %e,
                "failed to append events to run record; in-memory log remains authoritative"
            );
        }
    }

    async fn complete(&mut self, generation: u64, outcome: RunOutcome) {
        let Some(run) = self.run.as_mut().filter(|run| run.accepts(generation)) else {
            warn!(
                subscription_id = %self.subscription_id,
                generation,
                "ignoring completion for a run that is not running"
            );
            return;
        };

        run.finish(outcome, Utc::now());
        self.pending.clear();
        info!(
            subscription_id = %self.subscription_id,
            generation,
            status = %run.status,
            events = run.events.len(),
            error = run.error_detail.as_deref().unwrap_or(""),
            "run finished"
        );
        self.persist().await;
        self.schedule_flush(generation, self.shared.config.flush_delay());
    }

    async fn flush(&mut self, generation: u64) {
        let Some(mut run) = self.run.take() else {
            debug!(subscription_id = %self.subscription_id, generation, "flush for idle key ignored");
            return;
        };
        if run.generation != generation {
            debug!(
                subscription_id = %self.subscription_id,
                generation,
                live_generation = run.generation,
                "stale flush ignored"
            );
            self.run = Some(run);
            return;
        }

        run.events.clear();
        self.pending.clear();
        match self.shared.store.delete(&self.subscription_id, generation).await {
            Ok(_) => {
                self.shared
                    .flushed
                    .remove_if(&self.subscription_id, |_, g| *g <= generation);
            }
            Err(e) => {
                warn!(
                    subscription_id = %self.subscription_id,
                    generation,
                    error = %e,
                    "failed to delete flushed run record; it will be skipped and deleted on next load"
                );
                self.shared
                    .flushed
                    .insert(self.subscription_id.clone(), generation);
            }
        }
        info!(subscription_id = %self.subscription_id, generation, "run flushed; key is idle");
    }

    async fn persist(&self) {
        let Some(run) = &self.run else {
            return;
        };
        let expires_at = if run.status.is_terminal() {
            let ttl = chrono::Duration::from_std(self.shared.config.store_ttl())
                .unwrap_or_else(|_| chrono::Duration::days(1));
            Some(run.finished_at.unwrap_or_else(Utc::now) + ttl)
        } else {
            None
        };
        let record = PersistedRun::from_run(run, self.shared.instance_id, expires_at);
        if let Err(e) = self.shared.store.save(&record).await {
            warn!(
                subscription_id = %self.subscription_id,
                generation = run.generation,
                error = %e,
                "failed to persist run record; in-memory state remains authoritative"
            );
        }
    }

    fn schedule_flush(&self, generation: u64, delay: Duration) {
        let tx = self.self_tx.clone();
        debug!(
            subscription_id = %self.subscription_id,
            generation,
            delay_ms = delay.as_millis() as u64,
            "flush scheduled"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The actor may have retired already; a dropped flush is harmless then.
            let _ = tx.send(SubscriptionCommand::Flush { generation });
        });
    }
}
