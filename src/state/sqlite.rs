//! SQLite-backed prior state

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::migrations::run_migrations;
use super::PriorStateStore;
use crate::error::Result;
use crate::types::PriorRecord;

/// Prior state stored in a local SQLite database
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open or create the state database (`:memory:` for an ephemeral one)
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            "#,
        )?;

        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PriorRecord> {
    let uploaded_at: String = row.get(6)?;
    let size_bytes: i64 = row.get(3)?;
    let chunk_count: i64 = row.get(4)?;
    let compressed: i32 = row.get(5)?;

    Ok(PriorRecord {
        system_id: row.get(0)?,
        logical_name: row.get(1)?,
        checksum: row.get(2)?,
        size_bytes: size_bytes.max(0) as u64,
        chunk_count: chunk_count.clamp(0, u32::MAX as i64) as u32,
        compressed: compressed != 0,
        uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl PriorStateStore for SqliteStateStore {
    fn get(&self, system_id: &str, logical_name: &str) -> Result<Option<PriorRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT system_id, logical_name, checksum, size_bytes, chunk_count, compressed, uploaded_at
                 FROM prior_uploads WHERE system_id = ? AND logical_name = ?",
                params![system_id, logical_name],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn put_all(&self, records: &[PriorRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO prior_uploads
                    (system_id, logical_name, checksum, size_bytes, chunk_count, compressed, uploaded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(system_id, logical_name) DO UPDATE SET
                    checksum = excluded.checksum,
                    size_bytes = excluded.size_bytes,
                    chunk_count = excluded.chunk_count,
                    compressed = excluded.compressed,
                    uploaded_at = excluded.uploaded_at",
            )?;
            for record in records {
                stmt.execute(params![
                    record.system_id,
                    record.logical_name,
                    record.checksum,
                    record.size_bytes as i64,
                    record.chunk_count as i64,
                    record.compressed as i32,
                    record.uploaded_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list(&self, system_id: &str) -> Result<Vec<PriorRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT system_id, logical_name, checksum, size_bytes, chunk_count, compressed, uploaded_at
             FROM prior_uploads WHERE system_id = ? ORDER BY logical_name",
        )?;
        let records = stmt
            .query_map(params![system_id], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn clear(&self, system_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM prior_uploads WHERE system_id = ?",
            params![system_id],
        )?;
        Ok(removed)
    }
}
