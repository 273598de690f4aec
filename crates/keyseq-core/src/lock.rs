//! # Row Lock Manager
//!
//! Exclusive row locks keyed by `(table, key)`.
//!
//! - A lock is owned by one transaction and is re-entrant for that owner
//! - Waiters park on a `Condvar` until the owner commits or rolls back
//! - `nowait` requests fail immediately with `SequenceError::WouldBlock`
//! - A wait that would close a cycle in the wait-for graph fails with
//!   `SequenceError::Deadlock` instead of parking forever
//!
//! The key does not have to exist as a row: locking a missing key is how
//! concurrent creators of the same sequence row serialize.

use crate::SequenceError;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Identity of a lockable row: `(storage table, row key)`.
pub(crate) type RowId = (String, String);

#[derive(Debug, Default)]
struct LockTable {
    /// Row -> owning transaction.
    owners: BTreeMap<RowId, u64>,
    /// Transaction -> row it is currently parked on.
    waiting: BTreeMap<u64, RowId>,
}

impl LockTable {
    /// Follow the wait-for chain from `owner`; true if it leads back to `txn`.
    fn closes_cycle(&self, txn: u64, owner: u64) -> bool {
        let mut current = owner;
        // Each step visits a distinct waiting transaction, so the chain is
        // bounded by the number of waiters.
        for _ in 0..=self.waiting.len() {
            if current == txn {
                return true;
            }
            match self
                .waiting
                .get(&current)
                .and_then(|row| self.owners.get(row))
            {
                Some(&next) => current = next,
                None => return false,
            }
        }
        false
    }
}

/// Process-wide table of row locks for one `Database`.
#[derive(Debug, Default)]
pub(crate) struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock on `row` for `txn`.
    ///
    /// Returns `true` if the lock was newly taken, `false` if `txn` already
    /// held it.
    pub(crate) fn acquire(&self, txn: u64, row: &RowId, nowait: bool) -> Result<bool, SequenceError> {
        let mut table = lock_recover(&self.table, "row_locks");
        loop {
            let owner = match table.owners.get(row) {
                None => {
                    table.owners.insert(row.clone(), txn);
                    table.waiting.remove(&txn);
                    return Ok(true);
                }
                Some(&owner) if owner == txn => return Ok(false),
                Some(&owner) => owner,
            };

            if nowait {
                warn!(table = %row.0, key = %row.1, txn, owner, "row lock contended (nowait)");
                return Err(SequenceError::WouldBlock {
                    table: row.0.clone(),
                    key: row.1.clone(),
                });
            }

            if table.closes_cycle(txn, owner) {
                table.waiting.remove(&txn);
                warn!(table = %row.0, key = %row.1, txn, owner, "deadlock detected");
                return Err(SequenceError::Deadlock {
                    table: row.0.clone(),
                    key: row.1.clone(),
                });
            }

            table.waiting.insert(txn, row.clone());
            table = match self.released.wait(table) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!(lock = "row_locks", "mutex poisoned; recovering inner state");
                    poisoned.into_inner()
                }
            };
        }
    }

    /// Release every lock in `rows` owned by `txn` and wake all waiters.
    pub(crate) fn release_all(&self, txn: u64, rows: &[RowId]) {
        if rows.is_empty() {
            return;
        }
        let mut table = lock_recover(&self.table, "row_locks");
        for row in rows {
            if table.owners.get(row) == Some(&txn) {
                table.owners.remove(row);
            }
        }
        drop(table);
        self.released.notify_all();
    }

    /// Current owner of `row`, if locked.
    #[cfg(test)]
    pub(crate) fn owner(&self, row: &RowId) -> Option<u64> {
        lock_recover(&self.table, "row_locks").owners.get(row).copied()
    }
}

// =============================================================================
// POISON RECOVERY
// =============================================================================

// A panicking thread cannot leave these maps half-updated in a way that
// matters: every mutation is a single insert or remove.

pub(crate) fn lock_recover<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = name, "mutex poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read_recover<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = name, "rwlock poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write_recover<'a, T>(
    lock: &'a RwLock<T>,
    name: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock = name, "rwlock poisoned; recovering inner state");
            poisoned.into_inner()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
