//! # redb-backed Row Storage
//!
//! Committed rows persisted in a redb embedded database, providing:
//! - ACID commits (each transaction's write buffer is one redb write)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC reads that never block on a commit in progress
//!
//! redb itself allows a single writer at a time. Row locks are held above
//! this layer for the whole lifetime of a transaction, and redb's writer is
//! only taken for the short batch apply at commit, so transactions on
//! different keys still proceed independently.

use super::WriteOp;
use crate::SequenceError;
use redb::{Database, ReadableDatabase, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for all rows: (table name, row key) -> encoded row bytes
const ROWS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("rows");

fn io_error(e: impl std::fmt::Display) -> SequenceError {
    SequenceError::IoError(e.to_string())
}

/// Committed rows stored in redb.
pub struct RedbRows {
    db: Database,
}

impl std::fmt::Debug for RedbRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRows")
            .field("row_count", &self.len().ok())
            .finish_non_exhaustive()
    }
}

impl RedbRows {
    /// Open or create a row database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SequenceError> {
        let db = Database::create(path.as_ref()).map_err(io_error)?;

        // Initialize the table if it doesn't exist
        {
            let write_txn = db.begin_write().map_err(io_error)?;
            let _ = write_txn.open_table(ROWS).map_err(io_error)?;
            write_txn.commit().map_err(io_error)?;
        }

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), SequenceError> {
        self.db.compact().map_err(io_error)?;
        Ok(())
    }

    /// Total number of stored rows across all tables.
    pub fn len(&self) -> Result<u64, SequenceError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let table = read_txn.open_table(ROWS).map_err(io_error)?;
        table.len().map_err(io_error)
    }

    /// Check if no rows are stored.
    pub fn is_empty(&self) -> Result<bool, SequenceError> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, SequenceError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let rows = read_txn.open_table(ROWS).map_err(io_error)?;
        let value = rows
            .get((table, key))
            .map_err(io_error)?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    pub fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>, SequenceError> {
        let read_txn = self.db.begin_read().map_err(io_error)?;
        let rows = read_txn.open_table(ROWS).map_err(io_error)?;

        let mut out = Vec::new();
        for entry in rows.range((table, "")..).map_err(io_error)? {
            let (key, value) = entry.map_err(io_error)?;
            let (row_table, row_key) = key.value();
            if row_table != table {
                break;
            }
            out.push((row_key.to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Apply a write batch in a single redb transaction.
    pub fn apply(&self, ops: &[WriteOp]) -> Result<(), SequenceError> {
        let write_txn = self.db.begin_write().map_err(io_error)?;
        {
            let mut rows = write_txn.open_table(ROWS).map_err(io_error)?;
            for op in ops {
                match op {
                    WriteOp::Put { table, key, bytes } => {
                        rows.insert((table.as_str(), key.as_str()), bytes.as_slice())
                            .map_err(io_error)?;
                    }
                    WriteOp::Delete { table, key } => {
                        rows.remove((table.as_str(), key.as_str()))
                            .map_err(io_error)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(io_error)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
