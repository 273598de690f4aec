//! # Sequence Store
//!
//! The counter table: one row per key holding the current high-water mark.
//!
//! Every operation joins the caller's `Transaction`, so a counter change
//! commits or rolls back together with the caller's own write.
//!
//! ## Plain allocation
//!
//! `next_value` locks the key first and reads second. Because the lock is on
//! the key rather than on an existing row, concurrent callers on a brand new
//! key also serialize: exactly one creates the row (value 1), the rest
//! increment it. Callers on different keys never wait on each other.

use crate::database::{Database, Transaction};
use crate::primitives::{FIRST_VALUE, UNSEEN_VALUE};
use crate::{SequenceError, SequenceRow};
use tracing::debug;

/// Handle to one registered sequence table.
///
/// Obtained from `Database::sequence_store` or from the active
/// `SequenceModel`; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStore {
    table: String,
}

impl SequenceStore {
    pub(crate) fn bind(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    /// Name of the sequence table this handle writes to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Current value for `key`, or 0 if the key has never been allocated.
    /// Takes no lock.
    pub fn current_value(&self, txn: &Transaction<'_>, key: &str) -> Result<u64, SequenceError> {
        Ok(txn
            .select_sequence(&self.table, key)?
            .map_or(UNSEEN_VALUE, |row| row.value))
    }

    /// Fetch the row for `key`, creating it with `default` if absent.
    ///
    /// With `locked`, the key is locked before the read and stays locked
    /// until the transaction ends. Without it the read is unlocked, and the
    /// lock is only taken if the row has to be created.
    pub fn get_or_create(
        &self,
        txn: &mut Transaction<'_>,
        key: &str,
        default: u64,
        locked: bool,
        nowait: bool,
    ) -> Result<(SequenceRow, bool), SequenceError> {
        if locked {
            txn.lock_sequence(&self.table, key, nowait)?;
        } else if let Some(row) = txn.select_sequence(&self.table, key)? {
            return Ok((row, false));
        } else {
            txn.lock_sequence(&self.table, key, nowait)?;
        }

        // The row may have been created while we waited for the lock.
        if let Some(row) = txn.select_sequence(&self.table, key)? {
            return Ok((row, false));
        }

        let row = SequenceRow::new(key, default);
        txn.upsert_sequence(&self.table, &row)?;
        debug!(table = %self.table, key, value = default, "created sequence row");
        Ok((row, true))
    }

    /// Allocate the next value for `key`.
    ///
    /// A missing row is created at 1 and 1 is returned; otherwise the row is
    /// incremented and the new value returned.
    pub fn next_value(
        &self,
        txn: &mut Transaction<'_>,
        key: &str,
        nowait: bool,
    ) -> Result<u64, SequenceError> {
        let (mut row, created) = self.get_or_create(txn, key, FIRST_VALUE, true, nowait)?;
        if created {
            return Ok(row.value);
        }

        let value = row.value.checked_add(1).ok_or_else(|| {
            SequenceError::InvalidValue(format!("sequence '{key}' is exhausted"))
        })?;
        row.touch(value);
        txn.upsert_sequence(&self.table, &row)?;
        Ok(value)
    }

    /// Allocate the next value in a transaction of its own and commit it.
    pub fn next_value_autocommit(
        &self,
        db: &Database,
        key: &str,
        nowait: bool,
    ) -> Result<u64, SequenceError> {
        let mut txn = db.begin();
        let value = self.next_value(&mut txn, key, nowait)?;
        txn.commit()?;
        Ok(value)
    }

    /// Overwrite the counter for `key`, creating the row if needed.
    pub fn set_current_value(
        &self,
        txn: &mut Transaction<'_>,
        key: &str,
        value: u64,
        nowait: bool,
    ) -> Result<(), SequenceError> {
        let row = match txn.select_sequence_for_update(&self.table, key, nowait)? {
            Some(mut row) => {
                row.touch(value);
                row
            }
            None => SequenceRow::new(key, value),
        };
        txn.upsert_sequence(&self.table, &row)
    }

    /// Delete the row for `key`, so the next allocation starts over.
    ///
    /// The engine itself never calls this.
    pub fn reset(&self, txn: &mut Transaction<'_>, key: &str) -> Result<bool, SequenceError> {
        txn.delete_sequence(&self.table, key)
    }

    /// All rows, ordered by key.
    pub fn rows(&self, txn: &Transaction<'_>) -> Result<Vec<SequenceRow>, SequenceError> {
        txn.sequences(&self.table)
    }
}

// =============================================================================
// TESTS
// =============================================================================
