//! Durable per-entity history for the change-detection engine.
//!
//! The default implementation ([`engine::SqliteHistoryStore`]) keeps one
//! row per entity in a WAL-mode SQLite database, so history survives
//! process restarts. [`memory::MemoryHistoryStore`] is a volatile
//! alternative for tests and dry runs.

pub mod engine;
pub mod error;
pub mod memory;

#[cfg(test)]
mod tests;

use driftwatch_common::types::HistoryRecord;
use error::Result;

/// Key-value persistence of [`HistoryRecord`]s keyed by entity id.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because every entity check in a poll cycle runs as its own task. Each
/// entity is only ever read and written by its own check, so a store
/// needs per-key atomicity but no cross-entity locking.
pub trait HistoryStore: Send + Sync {
    /// Loads the entity's record, or `None` if it has never been observed.
    fn load(&self, entity_id: &str) -> Result<Option<HistoryRecord>>;

    /// Atomically replaces the entity's record.
    fn save(&self, record: &HistoryRecord) -> Result<()>;

    /// Deletes the entity's record. Returns true if one existed.
    fn remove(&self, entity_id: &str) -> Result<bool>;

    /// Ids of every entity with stored history, sorted.
    fn entity_ids(&self) -> Result<Vec<String>>;
}
