//! Persistence Layer for Run Records
//!
//! The coordinator writes every state transition through a `RunStore` so a
//! recreated actor (or a restarted process) picks up where the last one left off:
//! - In-memory store for single-process deployments and tests
//! - PostgreSQL store for durability across restarts

pub mod memory;
pub mod postgres;
pub mod run_store;

pub use memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;
pub use run_store::{PersistedRun, RunStore};
