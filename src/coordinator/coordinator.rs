//! Coordinator - admission control and event routing for subscription runs
//!
//! The Coordinator keeps a registry of per-key actors (see `actor.rs`).
//! Callers hold a `CoordinatorHandle` (clone-friendly) and never touch run
//! state directly:
//!   - `admit` performs the single-flight check-and-set for a key
//!   - `emit` / `complete` route runner output into the admitted run
//!   - `status` returns a side-effect-free snapshot for pollers
//!
//! Different keys never contend with each other; operations on one key are
//! totally ordered by that key's mailbox.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::actor::SubscriptionActor;
use super::command::SubscriptionCommand;
use super::config::CoordinatorConfig;
use super::state::{RunEvent, RunOutcome, RunSnapshot, RunTicket};
use crate::error::AdmitError;
use crate::persistence::RunStore;

/// Registry entry for a live actor
pub(crate) struct ActorSlot {
    pub(crate) actor_id: u64,
    pub(crate) tx: mpsc::UnboundedSender<SubscriptionCommand>,
}

/// State shared by the handle and every actor
pub(crate) struct CoordinatorShared {
    pub(crate) config: CoordinatorConfig,
    pub(crate) store: Arc<dyn RunStore>,
    pub(crate) instance_id: Uuid,
    pub(crate) actors: DashMap<String, ActorSlot>,
    /// Last flushed generation per key whose store delete failed
    pub(crate) flushed: DashMap<String, u64>,
    generation: AtomicU64,
    actor_seq: AtomicU64,
}

impl CoordinatorShared {
    /// Allocate a run generation, unique and increasing for this process
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Keep future generations above one seen in the store
    pub(crate) fn observe_generation(&self, generation: u64) {
        self.generation.fetch_max(generation, Ordering::SeqCst);
    }

    fn spawn_actor(self: &Arc<Self>, subscription_id: &str) -> ActorSlot {
        let actor_id = self.actor_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SubscriptionActor::new(
            subscription_id.to_string(),
            actor_id,
            Arc::clone(self),
            tx.clone(),
            rx,
        );
        debug!(subscription_id, actor_id, "spawning subscription actor");
        tokio::spawn(actor.run());
        ActorSlot { actor_id, tx }
    }

    /// Enqueue a command for a key, creating its actor if needed.
    ///
    /// The send happens while the registry entry is held so an actor can
    /// never retire between our lookup and our enqueue.
    fn dispatch(self: &Arc<Self>, subscription_id: &str, cmd: SubscriptionCommand) {
        let mut slot = self
            .actors
            .entry(subscription_id.to_string())
            .or_insert_with(|| self.spawn_actor(subscription_id));

        if let Err(mpsc::error::SendError(cmd)) = slot.tx.send(cmd) {
            // Receiver gone without deregistering: the actor task died.
            warn!(
                subscription_id,
                actor_id = slot.actor_id,
                command = cmd.name(),
                "subscription actor vanished; respawning"
            );
            *slot = self.spawn_actor(subscription_id);
            if let Err(mpsc::error::SendError(cmd)) = slot.tx.send(cmd) {
                warn!(subscription_id, command = cmd.name(), "command dropped: fresh actor unreachable");
            }
        }
    }
}

/// Clonable handle for the API layer and the runner
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<CoordinatorShared>,
}

impl CoordinatorHandle {
    /// Start a run for `subscription_id` unless one is already running.
    ///
    /// Fails closed with `Unavailable` when the store cannot record the admission.
    pub async fn admit(&self, subscription_id: &str) -> Result<RunTicket, AdmitError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .dispatch(subscription_id, SubscriptionCommand::Admit(reply_tx));
        reply_rx.await.unwrap_or_else(|_| {
            Err(AdmitError::Unavailable(
                "subscription actor stopped before answering".to_string(),
            ))
        })
    }

    /// Append an event to the admitted run. Dropped if that run has finished.
    pub fn emit(&self, ticket: &RunTicket, event: RunEvent) {
        self.shared.dispatch(
            &ticket.subscription_id,
            SubscriptionCommand::Emit {
                generation: ticket.generation,
                event,
            },
        );
    }

    /// Report the terminal outcome of the admitted run. Repeats are ignored.
    pub fn complete(&self, ticket: &RunTicket, outcome: RunOutcome) {
        self.shared.dispatch(
            &ticket.subscription_id,
            SubscriptionCommand::Complete {
                generation: ticket.generation,
                outcome,
            },
        );
    }

    /// Reset a key to idle if `generation` is still its live run.
    ///
    /// Normally fired by the flush timer that `complete` schedules.
    pub fn flush(&self, subscription_id: &str, generation: u64) {
        self.shared
            .dispatch(subscription_id, SubscriptionCommand::Flush { generation });
    }

    /// Current status and events. Unknown keys read as idle.
    pub async fn status(&self, subscription_id: &str) -> RunSnapshot {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .dispatch(subscription_id, SubscriptionCommand::Snapshot(reply_tx));
        match reply_rx.await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                warn!(subscription_id, "subscription actor stopped before answering status read");
                RunSnapshot::idle(subscription_id)
            }
        }
    }

    /// Keys that currently have an actor (running, terminal, or mid-request)
    pub fn live_subscriptions(&self) -> usize {
        self.shared.actors.len()
    }

    pub fn instance_id(&self) -> Uuid {
        self.shared.instance_id
    }

    pub fn store_name(&self) -> &'static str {
        self.shared.store.name()
    }
}

/// The Coordinator - owns the actor registry and the run store
pub struct Coordinator {
    shared: Arc<CoordinatorShared>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn RunStore>) -> Self {
        Self::with_instance_id(config, store, Uuid::new_v4())
    }

    /// Build with a fixed instance id (restart tests, multi-process debugging)
    pub fn with_instance_id(
        config: CoordinatorConfig,
        store: Arc<dyn RunStore>,
        instance_id: Uuid,
    ) -> Self {
        Self {
            shared: Arc::new(CoordinatorShared {
                config,
                store,
                instance_id,
                actors: DashMap::new(),
                flushed: DashMap::new(),
                generation: AtomicU64::new(0),
                actor_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Create a clonable handle
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}
