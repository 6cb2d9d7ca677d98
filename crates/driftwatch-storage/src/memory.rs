use crate::error::Result;
use crate::HistoryStore;
use driftwatch_common::types::HistoryRecord;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Volatile history store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<HashMap<String, HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, HistoryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, entity_id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.lock_records().get(entity_id).cloned())
    }

    fn save(&self, record: &HistoryRecord) -> Result<()> {
        self.lock_records()
            .insert(record.entity_id.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, entity_id: &str) -> Result<bool> {
        Ok(self.lock_records().remove(entity_id).is_some())
    }

    fn entity_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.lock_records().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
