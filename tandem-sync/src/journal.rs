//! Durable journal of pending operations.
//!
//! Uses a SQLite file so queued work survives a process restart. Rows are
//! keyed by the manager's enqueue sequence and removed once the operation
//! reaches a terminal outcome, giving at-least-once delivery.

use crate::error::{SyncError, SyncResult};
use crate::operation::SyncOperation;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Storage for operations that have been queued but not yet finished.
pub trait OperationJournal<M>: Send + Sync {
    /// Records a queued operation under its sequence number.
    fn append(&self, seq: u64, operation: &SyncOperation<M>) -> SyncResult<()>;

    /// Forgets a finished operation.
    fn remove(&self, seq: u64) -> SyncResult<()>;

    /// Every pending operation, in sequence order. Rows that no longer
    /// decode into a valid operation are skipped.
    fn load(&self) -> SyncResult<Vec<(u64, SyncOperation<M>)>>;
}

/// [`OperationJournal`] backed by SQLite. Operations are stored as JSON.
pub struct SqliteJournal {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJournal {
    /// Opens (or creates) a journal at the given path.
    pub fn new(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::Journal(format!("failed to open journal: {e}")))?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory journal (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Journal(format!("failed to open in-memory journal: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> SyncResult<Self> {
        let journal = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> SyncResult<()> {
        self.conn()
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS sync_journal (
                    seq INTEGER PRIMARY KEY,
                    operation_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    path TEXT NOT NULL,
                    enqueued_at INTEGER NOT NULL,
                    operation TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sync_journal_path
                    ON sync_journal(path);
                ",
            )
            .map_err(|e| SyncError::Journal(format!("failed to init journal schema: {e}")))?;
        Ok(())
    }

    /// Number of pending rows.
    pub fn len(&self) -> SyncResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_journal", [], |row| row.get(0))
            .map_err(|e| SyncError::Journal(format!("failed to count journal: {e}")))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops every pending row.
    pub fn clear(&self) -> SyncResult<()> {
        self.conn()
            .execute("DELETE FROM sync_journal", [])
            .map_err(|e| SyncError::Journal(format!("failed to clear journal: {e}")))?;
        Ok(())
    }
}

impl<M> OperationJournal<M> for SqliteJournal
where
    M: tandem_types::Record + Serialize + DeserializeOwned + Send + Sync,
{
    fn append(&self, seq: u64, operation: &SyncOperation<M>) -> SyncResult<()> {
        let json = serde_json::to_string(operation)?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO sync_journal (seq, operation_id, kind, path, enqueued_at, operation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    seq as i64,
                    operation.id().to_string(),
                    operation.kind().as_str(),
                    operation.path(),
                    operation.enqueued_at().as_millis() as i64,
                    json,
                ],
            )
            .map_err(|e| SyncError::Journal(format!("failed to append operation: {e}")))?;
        Ok(())
    }

    fn remove(&self, seq: u64) -> SyncResult<()> {
        self.conn()
            .execute("DELETE FROM sync_journal WHERE seq = ?1", params![seq as i64])
            .map_err(|e| SyncError::Journal(format!("failed to remove operation: {e}")))?;
        Ok(())
    }

    fn load(&self) -> SyncResult<Vec<(u64, SyncOperation<M>)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT seq, operation FROM sync_journal ORDER BY seq ASC")
            .map_err(|e| SyncError::Journal(format!("failed to prepare journal query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let seq: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((seq, json))
            })
            .map_err(|e| SyncError::Journal(format!("failed to query journal: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let (seq, json) =
                row.map_err(|e| SyncError::Journal(format!("failed to read journal row: {e}")))?;
            match serde_json::from_str::<SyncOperation<M>>(&json) {
                Ok(operation) => result.push((seq as u64, operation)),
                Err(e) => warn!("Skipping unreadable journal row {}: {}", seq, e),
            }
        }
        Ok(result)
    }
}
