//! # Row Storage Backends
//!
//! Committed rows live in one of two backends:
//! - `InMemory`: `BTreeMap` rows (fast, volatile)
//! - `Persistent`: a single redb table (ACID, on disk)
//!
//! Backends only store committed bytes keyed by `(table, key)`. Locking,
//! write buffering and constraint checks happen in `database`, so both
//! backends give identical transactional behavior.

pub mod memory;
pub mod redb_rows;

pub use memory::MemoryRows;
pub use redb_rows::RedbRows;

use crate::SequenceError;

/// One buffered write, applied at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        table: String,
        key: String,
        bytes: Vec<u8>,
    },
    Delete {
        table: String,
        key: String,
    },
}

/// The committed row store beneath a `Database`.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory rows (fast, volatile).
    InMemory(MemoryRows),
    /// Disk-backed rows using redb (ACID, persistent).
    Persistent(RedbRows),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryRows::new())
    }
}

impl StorageBackend {
    /// Read one committed row.
    pub fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, SequenceError> {
        match self {
            Self::InMemory(rows) => Ok(rows.get(table, key)),
            Self::Persistent(rows) => rows.get(table, key),
        }
    }

    /// All committed rows of `table`, ordered by key.
    pub fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>, SequenceError> {
        match self {
            Self::InMemory(rows) => Ok(rows.scan(table)),
            Self::Persistent(rows) => rows.scan(table),
        }
    }

    /// Apply a batch of writes atomically.
    pub fn apply(&self, ops: &[WriteOp]) -> Result<(), SequenceError> {
        if ops.is_empty() {
            return Ok(());
        }
        match self {
            Self::InMemory(rows) => {
                rows.apply(ops);
                Ok(())
            }
            Self::Persistent(rows) => rows.apply(ops),
        }
    }

    /// Check if rows are stored on disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}
