use crate::error::{Result, StorageError};
use crate::HistoryStore;
use chrono::{DateTime, Utc};
use driftwatch_common::types::HistoryRecord;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const HISTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entity_history (
    entity_id TEXT PRIMARY KEY,
    snapshot_hash TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    series TEXT NOT NULL DEFAULT '{}',
    rule_states TEXT NOT NULL DEFAULT '{}',
    first_seen_at INTEGER NOT NULL,
    last_changed_at INTEGER NOT NULL,
    last_checked_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_checked ON entity_history(last_checked_at);
";

const DB_FILE: &str = "history.db";

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Opens (creating if needed) `history.db` inside `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open(&data_dir.join(DB_FILE))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened history store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct HistoryRow {
    entity_id: String,
    snapshot_hash: String,
    snapshot: String,
    series: String,
    rule_states: String,
    first_seen_at: i64,
    last_changed_at: i64,
    last_checked_at: i64,
}

impl HistoryRow {
    fn into_record(self) -> Result<HistoryRecord> {
        let entity_id = self.entity_id;
        let ts = |ms: i64, column: &str| -> Result<DateTime<Utc>> {
            DateTime::from_timestamp_millis(ms).ok_or_else(|| StorageError::Corrupt {
                entity_id: entity_id.clone(),
                reason: format!("{column} out of range: {ms}"),
            })
        };
        let first_seen_at = ts(self.first_seen_at, "first_seen_at")?;
        let last_changed_at = ts(self.last_changed_at, "last_changed_at")?;
        let last_checked_at = ts(self.last_checked_at, "last_checked_at")?;

        Ok(HistoryRecord {
            snapshot: serde_json::from_str(&self.snapshot)?,
            snapshot_hash: self.snapshot_hash.into(),
            series: serde_json::from_str(&self.series)?,
            rule_states: serde_json::from_str(&self.rule_states)?,
            first_seen_at,
            last_changed_at,
            last_checked_at,
            entity_id,
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn load(&self, entity_id: &str) -> Result<Option<HistoryRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id, snapshot_hash, snapshot, series, rule_states,
                    first_seen_at, last_changed_at, last_checked_at
             FROM entity_history WHERE entity_id = ?1",
        )?;
        let row = stmt
            .query_row(rusqlite::params![entity_id], |row| {
                Ok(HistoryRow {
                    entity_id: row.get(0)?,
                    snapshot_hash: row.get(1)?,
                    snapshot: row.get(2)?,
                    series: row.get(3)?,
                    rule_states: row.get(4)?,
                    first_seen_at: row.get(5)?,
                    last_changed_at: row.get(6)?,
                    last_checked_at: row.get(7)?,
                })
            })
            .optional()?;
        row.map(HistoryRow::into_record).transpose()
    }

    fn save(&self, record: &HistoryRecord) -> Result<()> {
        let snapshot = serde_json::to_string(&record.snapshot)?;
        let series = serde_json::to_string(&record.series)?;
        let rule_states = serde_json::to_string(&record.rule_states)?;

        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO entity_history
                (entity_id, snapshot_hash, snapshot, series, rule_states,
                 first_seen_at, last_changed_at, last_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity_id) DO UPDATE SET
                snapshot_hash = excluded.snapshot_hash,
                snapshot = excluded.snapshot,
                series = excluded.series,
                rule_states = excluded.rule_states,
                first_seen_at = excluded.first_seen_at,
                last_changed_at = excluded.last_changed_at,
                last_checked_at = excluded.last_checked_at",
            rusqlite::params![
                &record.entity_id,
                record.snapshot_hash.as_str(),
                snapshot,
                series,
                rule_states,
                record.first_seen_at.timestamp_millis(),
                record.last_changed_at.timestamp_millis(),
                record.last_checked_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn remove(&self, entity_id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        let removed = conn.execute(
            "DELETE FROM entity_history WHERE entity_id = ?1",
            rusqlite::params![entity_id],
        )?;
        Ok(removed > 0)
    }

    fn entity_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare_cached("SELECT entity_id FROM entity_history ORDER BY entity_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
