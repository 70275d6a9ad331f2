//! Prior upload state
//!
//! Remembers the checksum of the last successful upload of each
//! `(system_id, logical_name)` pair so unchanged files can be skipped.
//! Records are read before every cloud attempt and written only after the
//! whole batch has been committed.

mod migrations;
mod sqlite;

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::PriorRecord;

pub use migrations::SCHEMA_VERSION;
pub use sqlite::SqliteStateStore;

/// Storage for prior upload records
pub trait PriorStateStore: Send + Sync {
    /// Last committed record for a logical file
    fn get(&self, system_id: &str, logical_name: &str) -> Result<Option<PriorRecord>>;

    /// Commit records of one batch together
    fn put_all(&self, records: &[PriorRecord]) -> Result<()>;

    /// All records of a system, ordered by logical name
    fn list(&self, system_id: &str) -> Result<Vec<PriorRecord>>;

    /// Drop all records of a system, returning how many were removed
    fn clear(&self, system_id: &str) -> Result<usize>;
}

/// In-process state store, lost on exit
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<(String, String), PriorRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriorStateStore for MemoryStateStore {
    fn get(&self, system_id: &str, logical_name: &str) -> Result<Option<PriorRecord>> {
        Ok(self
            .records
            .read()
            .get(&(system_id.to_string(), logical_name.to_string()))
            .cloned())
    }

    fn put_all(&self, records: &[PriorRecord]) -> Result<()> {
        let mut map = self.records.write();
        for record in records {
            map.insert(
                (record.system_id.clone(), record.logical_name.clone()),
                record.clone(),
            );
        }
        Ok(())
    }

    fn list(&self, system_id: &str) -> Result<Vec<PriorRecord>> {
        let mut records: Vec<PriorRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.system_id == system_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        Ok(records)
    }

    fn clear(&self, system_id: &str) -> Result<usize> {
        let mut map = self.records.write();
        let before = map.len();
        map.retain(|(sys, _), _| sys != system_id);
        Ok(before - map.len())
    }
}
