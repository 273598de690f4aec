//! # Transactional Row Store
//!
//! The relational store the sequence engine runs against.
//!
//! A `Database` holds two kinds of tables over one storage backend:
//! - **Sequence tables**: `SequenceRow`s keyed by sequence key, ordered by key
//! - **Record tables**: `Record`s keyed by a store-assigned primary key, with
//!   optional unique attributes
//!
//! A `Transaction` provides:
//! - Exclusive row locks, blocking or `nowait`, held until commit/rollback
//! - A private write buffer; reads see committed rows overlaid with it
//! - Unique-attribute validation on write and again at commit
//! - Atomic apply of the buffer at commit
//!
//! Dropping a transaction without committing rolls it back.

use crate::formats::{decode_row, encode_row};
use crate::gap::CountedCollection;
use crate::lock::{LockManager, RowId, lock_recover, read_recover, write_recover};
use crate::primitives::{DEFAULT_SEQUENCE_MODEL, PK_WIDTH};
use crate::sequence::SequenceStore;
use crate::storage::{RedbRows, StorageBackend, WriteOp};
use crate::{Entity, FieldValue, Record, SequenceError, SequenceRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SEQUENCE_PREFIX: &str = "seq/";
const RECORD_PREFIX: &str = "rec/";

fn sequence_storage(table: &str) -> String {
    format!("{SEQUENCE_PREFIX}{table}")
}

fn record_storage(table: &str) -> String {
    format!("{RECORD_PREFIX}{table}")
}

fn pk_key(pk: i64) -> String {
    format!("{pk:0width$}", width = PK_WIDTH)
}

fn parse_pk(key: &str) -> Result<i64, SequenceError> {
    key.parse::<i64>()
        .map_err(|e| SequenceError::SerializationError(format!("bad primary key '{key}': {e}")))
}

/// Validate the `app_label.model_name` form of a sequence table name.
pub(crate) fn validate_model_name(name: &str) -> Result<(), SequenceError> {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(app), Some(model), None) if !app.is_empty() && !model.is_empty() => Ok(()),
        _ => Err(SequenceError::Configuration(format!(
            "sequence model must be of the form 'app_label.model_name', got '{name}'"
        ))),
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Declaration of a record table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    unique: Vec<String>,
}

impl TableSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: Vec::new(),
        }
    }

    /// Builder: declare a unique attribute.
    #[must_use]
    pub fn unique(mut self, attribute: impl Into<String>) -> Self {
        self.unique.push(attribute.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keep every unique attribute of `previous` that this declaration omits.
    fn merged_with(mut self, previous: &TableSchema) -> Self {
        for attribute in &previous.unique {
            if !self.unique.contains(attribute) {
                self.unique.push(attribute.clone());
            }
        }
        self
    }
}

/// Stored form of a record: fields only, relations collapsed to their pk.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    fields: BTreeMap<String, FieldValue>,
}

/// Committed holders of each unique attribute value: attribute -> value -> pk.
#[derive(Debug, Default)]
struct UniqueIndex {
    holders: BTreeMap<String, BTreeMap<FieldValue, i64>>,
}

impl UniqueIndex {
    fn build(attributes: &[String], rows: &[(String, Vec<u8>)]) -> Result<Self, SequenceError> {
        let mut index = Self {
            holders: attributes
                .iter()
                .map(|attribute| (attribute.clone(), BTreeMap::new()))
                .collect(),
        };
        if index.holders.is_empty() {
            return Ok(index);
        }
        for (key, bytes) in rows {
            let stored: StoredRecord = decode_row(bytes)?;
            index.insert(parse_pk(key)?, &stored.fields);
        }
        Ok(index)
    }

    fn holder(&self, attribute: &str, value: &FieldValue) -> Option<i64> {
        self.holders.get(attribute)?.get(value).copied()
    }

    fn insert(&mut self, pk: i64, fields: &BTreeMap<String, FieldValue>) {
        for (attribute, values) in &mut self.holders {
            if let Some(value) = fields.get(attribute).filter(|v| !v.is_null()) {
                values.insert(value.clone(), pk);
            }
        }
    }

    fn remove(&mut self, pk: i64, fields: &BTreeMap<String, FieldValue>) {
        for (attribute, values) in &mut self.holders {
            if let Some(value) = fields.get(attribute)
                && values.get(value) == Some(&pk)
            {
                values.remove(value);
            }
        }
    }
}

#[derive(Debug)]
struct RecordTable {
    schema: TableSchema,
    next_pk: i64,
    index: UniqueIndex,
}

/// A committed record row replaced by a commit, for index maintenance.
struct IndexChange {
    table: String,
    pk: i64,
    before: Option<BTreeMap<String, FieldValue>>,
    after: Option<BTreeMap<String, FieldValue>>,
}

#[derive(Debug, Default)]
struct Catalog {
    sequence_tables: BTreeSet<String>,
    record_tables: BTreeMap<String, RecordTable>,
}

// =============================================================================
// DATABASE
// =============================================================================

/// An embedded transactional row store.
#[derive(Debug)]
pub struct Database {
    backend: StorageBackend,
    locks: LockManager,
    /// Serializes commit validation + apply.
    commit_lock: Mutex<()>,
    catalog: RwLock<Catalog>,
    next_txn_id: AtomicU64,
}

impl Database {
    /// Create a volatile in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backend(StorageBackend::default())
    }

    /// Open or create a persistent database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SequenceError> {
        let rows = RedbRows::open(path)?;
        Ok(Self::with_backend(StorageBackend::Persistent(rows)))
    }

    fn with_backend(backend: StorageBackend) -> Self {
        let mut catalog = Catalog::default();
        catalog
            .sequence_tables
            .insert(DEFAULT_SEQUENCE_MODEL.to_string());
        Self {
            backend,
            locks: LockManager::new(),
            commit_lock: Mutex::new(()),
            catalog: RwLock::new(catalog),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    /// Compact the on-disk file. A no-op for in-memory databases.
    pub fn compact(&mut self) -> Result<(), SequenceError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(()),
            StorageBackend::Persistent(rows) => rows.compact(),
        }
    }

    /// Register a sequence table under an `app_label.model_name` name.
    ///
    /// Registering an already registered table is a no-op.
    pub fn register_sequence_table(&self, name: &str) -> Result<(), SequenceError> {
        validate_model_name(name)?;
        let mut catalog = write_recover(&self.catalog, "catalog");
        if catalog.record_tables.contains_key(name) {
            return Err(SequenceError::Configuration(format!(
                "'{name}' is already a record table"
            )));
        }
        if catalog.sequence_tables.insert(name.to_string()) {
            info!(table = name, "registered sequence table");
        }
        Ok(())
    }

    /// Check whether a sequence table is registered.
    #[must_use]
    pub fn has_sequence_table(&self, name: &str) -> bool {
        read_recover(&self.catalog, "catalog")
            .sequence_tables
            .contains(name)
    }

    /// Bind a handle to a registered sequence table.
    pub fn sequence_store(&self, name: &str) -> Result<SequenceStore, SequenceError> {
        validate_model_name(name)?;
        if !self.has_sequence_table(name) {
            return Err(SequenceError::Configuration(format!(
                "sequence model '{name}' has not been registered"
            )));
        }
        Ok(SequenceStore::bind(name))
    }

    /// Create (or re-declare after reopening) a record table.
    ///
    /// Re-declaring a table already in the catalog keeps its primary key
    /// counter, so keys handed to open transactions are never reissued, and
    /// keeps its existing unique attributes alongside any new ones.
    pub fn create_table(&self, schema: TableSchema) -> Result<(), SequenceError> {
        let name = schema.name.clone();
        if name.is_empty() {
            return Err(SequenceError::Configuration(
                "record table name must not be empty".to_string(),
            ));
        }

        // No commit may land between the scan and the catalog update.
        let _guard = lock_recover(&self.commit_lock, "commit");
        let stored = self.backend.scan(&record_storage(&name))?;
        let after_stored = match stored.last() {
            Some((key, _)) => parse_pk(key)?.saturating_add(1),
            None => 1,
        };

        let mut catalog = write_recover(&self.catalog, "catalog");
        if catalog.sequence_tables.contains(&name) {
            return Err(SequenceError::Configuration(format!(
                "'{name}' is already a sequence table"
            )));
        }
        let (schema, next_pk) = match catalog.record_tables.get(&name) {
            Some(existing) => (
                schema.merged_with(&existing.schema),
                existing.next_pk.max(after_stored),
            ),
            None => (schema, after_stored),
        };
        let index = UniqueIndex::build(&schema.unique, &stored)?;
        catalog.record_tables.insert(
            name.clone(),
            RecordTable {
                schema,
                next_pk,
                index,
            },
        );
        info!(table = %name, next_pk, "created record table");
        Ok(())
    }

    /// Start a transaction.
    pub fn begin(&self) -> Transaction<'_> {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        debug!(txn = id, "begin");
        Transaction {
            db: self,
            id,
            writes: BTreeMap::new(),
            locks: Vec::new(),
            finished: false,
        }
    }

    fn schema(&self, table: &str) -> Result<TableSchema, SequenceError> {
        read_recover(&self.catalog, "catalog")
            .record_tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| SequenceError::TableNotFound(table.to_string()))
    }

    fn require_sequence_table(&self, table: &str) -> Result<(), SequenceError> {
        if self.has_sequence_table(table) {
            Ok(())
        } else {
            Err(SequenceError::TableNotFound(table.to_string()))
        }
    }

    fn committed_holder(&self, table: &str, attribute: &str, value: &FieldValue) -> Option<i64> {
        read_recover(&self.catalog, "catalog")
            .record_tables
            .get(table)?
            .index
            .holder(attribute, value)
    }

    fn update_index(&self, changes: &[IndexChange]) {
        let mut catalog = write_recover(&self.catalog, "catalog");
        for change in changes {
            let Some(state) = catalog.record_tables.get_mut(&change.table) else {
                continue;
            };
            if let Some(before) = &change.before {
                state.index.remove(change.pk, before);
            }
            if let Some(after) = &change.after {
                state.index.insert(change.pk, after);
            }
        }
    }

    fn assign_pk(&self, table: &str) -> Result<i64, SequenceError> {
        let mut catalog = write_recover(&self.catalog, "catalog");
        let state = catalog
            .record_tables
            .get_mut(table)
            .ok_or_else(|| SequenceError::TableNotFound(table.to_string()))?;
        let pk = state.next_pk;
        state.next_pk = state.next_pk.saturating_add(1);
        Ok(pk)
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// A unit of work against a `Database`.
pub struct Transaction<'db> {
    db: &'db Database,
    id: u64,
    /// (storage table, key) -> new bytes, or `None` for a delete.
    writes: BTreeMap<(String, String), Option<Vec<u8>>>,
    locks: Vec<RowId>,
    finished: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("pending_writes", &self.writes.len())
            .field("locks_held", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl<'db> Transaction<'db> {
    /// Transaction identifier (unique per database).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The database this transaction belongs to.
    #[must_use]
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Number of row locks currently held.
    #[must_use]
    pub fn locks_held(&self) -> usize {
        self.locks.len()
    }

    // -------------------------------------------------------------------------
    // Low-level row access
    // -------------------------------------------------------------------------

    fn lock(&mut self, storage_table: String, key: &str, nowait: bool) -> Result<(), SequenceError> {
        let row = (storage_table, key.to_string());
        if self.db.locks.acquire(self.id, &row, nowait)? {
            self.locks.push(row);
        }
        Ok(())
    }

    fn read(&self, storage_table: &str, key: &str) -> Result<Option<Vec<u8>>, SequenceError> {
        match self.writes.get(&(storage_table.to_string(), key.to_string())) {
            Some(pending) => Ok(pending.clone()),
            None => self.db.backend.get(storage_table, key),
        }
    }

    fn scan(&self, storage_table: &str) -> Result<BTreeMap<String, Vec<u8>>, SequenceError> {
        let mut rows: BTreeMap<String, Vec<u8>> =
            self.db.backend.scan(storage_table)?.into_iter().collect();
        let own = self
            .writes
            .range((storage_table.to_string(), String::new())..)
            .take_while(|((t, _), _)| t == storage_table);
        for ((_, key), pending) in own {
            match pending {
                Some(bytes) => {
                    rows.insert(key.clone(), bytes.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        Ok(rows)
    }

    fn write(&mut self, storage_table: String, key: String, bytes: Option<Vec<u8>>) {
        self.writes.insert((storage_table, key), bytes);
    }

    // -------------------------------------------------------------------------
    // Sequence tables
    // -------------------------------------------------------------------------

    /// Take the exclusive lock on a sequence key (the row need not exist).
    pub fn lock_sequence(&mut self, table: &str, key: &str, nowait: bool) -> Result<(), SequenceError> {
        self.db.require_sequence_table(table)?;
        self.lock(sequence_storage(table), key, nowait)
    }

    /// Read a sequence row without locking.
    pub fn select_sequence(&self, table: &str, key: &str) -> Result<Option<SequenceRow>, SequenceError> {
        self.db.require_sequence_table(table)?;
        self.read(&sequence_storage(table), key)?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }

    /// Lock a sequence key, then read its row (`SELECT ... FOR UPDATE`).
    pub fn select_sequence_for_update(
        &mut self,
        table: &str,
        key: &str,
        nowait: bool,
    ) -> Result<Option<SequenceRow>, SequenceError> {
        self.lock_sequence(table, key, nowait)?;
        self.select_sequence(table, key)
    }

    /// Insert or replace a sequence row. Locks the key (blocking) if not held.
    pub fn upsert_sequence(&mut self, table: &str, row: &SequenceRow) -> Result<(), SequenceError> {
        self.lock_sequence(table, &row.key, false)?;
        let bytes = encode_row(row)?;
        self.write(sequence_storage(table), row.key.clone(), Some(bytes));
        Ok(())
    }

    /// Delete a sequence row. Returns whether a row existed.
    pub fn delete_sequence(&mut self, table: &str, key: &str) -> Result<bool, SequenceError> {
        self.lock_sequence(table, key, false)?;
        let existed = self.read(&sequence_storage(table), key)?.is_some();
        self.write(sequence_storage(table), key.to_string(), None);
        Ok(existed)
    }

    /// All rows of a sequence table, ordered by key.
    pub fn sequences(&self, table: &str) -> Result<Vec<SequenceRow>, SequenceError> {
        self.db.require_sequence_table(table)?;
        self.scan(&sequence_storage(table))?
            .values()
            .map(|bytes| decode_row(bytes))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Record tables
    // -------------------------------------------------------------------------

    /// Insert a record into the table named by its entity type and assign
    /// its primary key.
    pub fn insert_record(&mut self, record: &mut Record) -> Result<i64, SequenceError> {
        let table = record.entity_type().to_string();
        let schema = self.db.schema(&table)?;
        self.ensure_unique(&schema, None, record.fields())?;

        let pk = self.db.assign_pk(&table)?;
        let key = pk_key(pk);
        self.lock(record_storage(&table), &key, false)?;
        if self.read(&record_storage(&table), &key)?.is_some() {
            return Err(SequenceError::UniquenessConflict {
                table,
                attribute: "pk".to_string(),
                value: FieldValue::Int(pk),
            });
        }
        let bytes = encode_row(&StoredRecord {
            fields: record.fields().clone(),
        })?;
        self.write(record_storage(&table), key, Some(bytes));
        record.set_pk(pk);
        debug!(txn = self.id, table = %table, pk, "inserted record");
        Ok(pk)
    }

    /// Write back a saved record.
    pub fn update_record(&mut self, record: &Record) -> Result<(), SequenceError> {
        let table = record.entity_type().to_string();
        let pk = record.pk().ok_or_else(|| {
            SequenceError::InvalidValue(format!("cannot update unsaved {table} record"))
        })?;
        let schema = self.db.schema(&table)?;
        let key = pk_key(pk);
        self.lock(record_storage(&table), &key, false)?;
        if self.read(&record_storage(&table), &key)?.is_none() {
            return Err(SequenceError::RecordNotFound { table, pk });
        }
        self.ensure_unique(&schema, Some(pk), record.fields())?;
        let bytes = encode_row(&StoredRecord {
            fields: record.fields().clone(),
        })?;
        self.write(record_storage(&table), key, Some(bytes));
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub fn delete_record(&mut self, table: &str, pk: i64) -> Result<bool, SequenceError> {
        self.db.schema(table)?;
        let key = pk_key(pk);
        self.lock(record_storage(table), &key, false)?;
        let existed = self.read(&record_storage(table), &key)?.is_some();
        self.write(record_storage(table), key, None);
        Ok(existed)
    }

    /// Read one record by primary key.
    pub fn get_record(&self, table: &str, pk: i64) -> Result<Option<Record>, SequenceError> {
        self.db.schema(table)?;
        self.read(&record_storage(table), &pk_key(pk))?
            .map(|bytes| {
                let stored: StoredRecord = decode_row(&bytes)?;
                Ok(Record::from_parts(table.to_string(), pk, stored.fields))
            })
            .transpose()
    }

    /// All visible records of a table, ordered by primary key.
    pub fn records(&self, table: &str) -> Result<Vec<Record>, SequenceError> {
        self.db.schema(table)?;
        self.scan(&record_storage(table))?
            .iter()
            .map(|(key, bytes)| {
                let stored: StoredRecord = decode_row(bytes)?;
                Ok(Record::from_parts(table.to_string(), parse_pk(key)?, stored.fields))
            })
            .collect()
    }

    /// A read-only view of a record table for gap scans.
    #[must_use]
    pub fn collection<'t>(&'t self, table: &str) -> TableCollection<'t, 'db> {
        TableCollection {
            txn: self,
            table: table.to_string(),
        }
    }

    /// Check a row's unique values against this transaction's own writes and
    /// the committed index.
    fn ensure_unique(
        &self,
        schema: &TableSchema,
        pk: Option<i64>,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<(), SequenceError> {
        let constrained = constrained_values(schema, fields);
        if constrained.is_empty() {
            return Ok(());
        }

        let storage = record_storage(&schema.name);
        let own = self
            .writes
            .range((storage.clone(), String::new())..)
            .take_while(|((t, _), _)| *t == storage);
        for ((_, key), pending) in own {
            let Some(bytes) = pending else { continue };
            if Some(parse_pk(key)?) == pk {
                continue;
            }
            let other: StoredRecord = decode_row(bytes)?;
            for (attr, value) in &constrained {
                if other.fields.get(*attr) == Some(*value) {
                    return Err(uniqueness_conflict(&schema.name, attr, value));
                }
            }
        }

        self.ensure_committed_unique(schema, pk, &constrained)
    }

    /// Check unique values against committed rows this transaction has not
    /// itself rewritten or deleted.
    fn ensure_committed_unique(
        &self,
        schema: &TableSchema,
        pk: Option<i64>,
        constrained: &[(&String, &FieldValue)],
    ) -> Result<(), SequenceError> {
        let storage = record_storage(&schema.name);
        for (attr, value) in constrained {
            if let Some(holder) = self.db.committed_holder(&schema.name, attr, value)
                && Some(holder) != pk
                && !self.writes.contains_key(&(storage.clone(), pk_key(holder)))
            {
                return Err(uniqueness_conflict(&schema.name, attr, value));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Validate and apply all buffered writes, then release every lock.
    ///
    /// On error nothing is applied and the transaction is rolled back.
    pub fn commit(mut self) -> Result<(), SequenceError> {
        let result = self.apply_writes();
        self.finish();
        match &result {
            Ok(()) => debug!(txn = self.id, "commit"),
            Err(e) => warn!(txn = self.id, error = %e, "commit failed; rolled back"),
        }
        result
    }

    /// Discard buffered writes and release every lock.
    pub fn rollback(mut self) {
        debug!(txn = self.id, writes = self.writes.len(), "rollback");
        self.writes.clear();
        self.finish();
    }

    fn apply_writes(&self) -> Result<(), SequenceError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let _guard = lock_recover(&self.db.commit_lock, "commit");

        // Another transaction may have committed a conflicting unique value
        // since this one wrote; re-check touched rows against the index.
        let mut changes = Vec::new();
        for ((storage_table, key), pending) in &self.writes {
            let Some(table) = storage_table.strip_prefix(RECORD_PREFIX) else {
                continue;
            };
            let schema = self.db.schema(table)?;
            if schema.unique.is_empty() {
                continue;
            }
            let pk = parse_pk(key)?;
            let after = match pending {
                Some(bytes) => {
                    let stored: StoredRecord = decode_row(bytes)?;
                    let constrained = constrained_values(&schema, &stored.fields);
                    self.ensure_committed_unique(&schema, Some(pk), &constrained)?;
                    Some(stored.fields)
                }
                None => None,
            };
            let before = match self.db.backend.get(storage_table, key)? {
                Some(bytes) => Some(decode_row::<StoredRecord>(&bytes)?.fields),
                None => None,
            };
            changes.push(IndexChange {
                table: table.to_string(),
                pk,
                before,
                after,
            });
        }

        let ops: Vec<WriteOp> = self
            .writes
            .iter()
            .map(|((table, key), pending)| match pending {
                Some(bytes) => WriteOp::Put {
                    table: table.clone(),
                    key: key.clone(),
                    bytes: bytes.clone(),
                },
                None => WriteOp::Delete {
                    table: table.clone(),
                    key: key.clone(),
                },
            })
            .collect();
        self.db.backend.apply(&ops)?;
        self.db.update_index(&changes);
        Ok(())
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.db.locks.release_all(self.id, &self.locks);
            self.locks.clear();
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(txn = self.id, "dropped without commit; rolling back");
            self.finish();
        }
    }
}

fn constrained_values<'f>(
    schema: &'f TableSchema,
    fields: &'f BTreeMap<String, FieldValue>,
) -> Vec<(&'f String, &'f FieldValue)> {
    schema
        .unique
        .iter()
        .filter_map(|attr| fields.get(attr).map(|v| (attr, v)))
        .filter(|(_, v)| !v.is_null())
        .collect()
}

fn uniqueness_conflict(table: &str, attribute: &str, value: &FieldValue) -> SequenceError {
    warn!(table, attribute, value = %value, "uniqueness conflict");
    SequenceError::UniquenessConflict {
        table: table.to_string(),
        attribute: attribute.to_string(),
        value: value.clone(),
    }
}

// =============================================================================
// COUNTED COLLECTION VIEW
// =============================================================================

/// A record table seen through a transaction.
#[derive(Debug)]
pub struct TableCollection<'t, 'db> {
    txn: &'t Transaction<'db>,
    table: String,
}

impl CountedCollection for TableCollection<'_, '_> {
    fn ordered_values(&self, attribute: &str, floor: u64) -> Result<Vec<u64>, SequenceError> {
        let mut values = Vec::new();
        for record in self.txn.records(&self.table)? {
            match record.get(attribute) {
                None | Some(FieldValue::Null) => {}
                Some(FieldValue::Int(v)) => {
                    if let Ok(v) = u64::try_from(*v)
                        && v > floor
                    {
                        values.push(v);
                    }
                }
                Some(other) => {
                    return Err(SequenceError::InvalidValue(format!(
                        "{}.{} holds non-integer value {:?}",
                        self.table, attribute, other
                    )));
                }
            }
        }
        values.sort_unstable();
        Ok(values)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_table_is_registered() {
        let db = Database::in_memory();
        assert!(db.has_sequence_table(DEFAULT_SEQUENCE_MODEL));
    }

    #[test]
    fn malformed_sequence_table_rejected() {
        let db = Database::in_memory();
        for bad in ["sequence", "a.b.c", ".model", "app."] {
            assert!(matches!(
                db.register_sequence_table(bad),
                Err(SequenceError::Configuration(_))
            ));
        }
    }

    #[test]
    fn name_cannot_be_both_kinds_of_table() {
        let db = Database::in_memory();
        db.register_sequence_table("app.counters").expect("register");
        assert!(db.create_table(TableSchema::new("app.counters")).is_err());
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        txn.upsert_sequence(DEFAULT_SEQUENCE_MODEL, &SequenceRow::new("k", 5))
            .expect("upsert");
        assert_eq!(
            txn.select_sequence(DEFAULT_SEQUENCE_MODEL, "k")
                .expect("own read")
                .map(|r| r.value),
            Some(5)
        );

        let other = db.begin();
        assert!(
            other
                .select_sequence(DEFAULT_SEQUENCE_MODEL, "k")
                .expect("other read")
                .is_none()
        );
        drop(other);

        txn.commit().expect("commit");
        let reader = db.begin();
        assert_eq!(
            reader
                .select_sequence(DEFAULT_SEQUENCE_MODEL, "k")
                .expect("read")
                .map(|r| r.value),
            Some(5)
        );
    }

    #[test]
    fn rollback_discards_and_unlocks() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        txn.upsert_sequence(DEFAULT_SEQUENCE_MODEL, &SequenceRow::new("k", 5))
            .expect("upsert");
        assert_eq!(txn.locks_held(), 1);
        txn.rollback();

        let mut other = db.begin();
        assert!(
            other
                .select_sequence_for_update(DEFAULT_SEQUENCE_MODEL, "k", true)
                .expect("lock is free")
                .is_none()
        );
    }

    #[test]
    fn drop_releases_locks() {
        let db = Database::in_memory();
        {
            let mut txn = db.begin();
            txn.lock_sequence(DEFAULT_SEQUENCE_MODEL, "k", false)
                .expect("lock");
        }
        let mut other = db.begin();
        other
            .lock_sequence(DEFAULT_SEQUENCE_MODEL, "k", true)
            .expect("released on drop");
    }

    #[test]
    fn records_get_sequential_primary_keys() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item")).expect("table");

        let mut txn = db.begin();
        let mut a = Record::new("item");
        let mut b = Record::new("item");
        assert_eq!(txn.insert_record(&mut a).expect("a"), 1);
        assert_eq!(txn.insert_record(&mut b).expect("b"), 2);
        txn.commit().expect("commit");

        let txn = db.begin();
        let pks: Vec<Option<i64>> = txn
            .records("item")
            .expect("records")
            .iter()
            .map(Record::pk)
            .collect();
        assert_eq!(pks, vec![Some(1), Some(2)]);
    }

    #[test]
    fn unique_attribute_enforced_on_insert() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item").unique("number"))
            .expect("table");

        let mut txn = db.begin();
        txn.insert_record(&mut Record::new("item").with("number", 1_i64))
            .expect("first");
        let result = txn.insert_record(&mut Record::new("item").with("number", 1_i64));
        assert!(matches!(
            result,
            Err(SequenceError::UniquenessConflict { .. })
        ));
    }

    #[test]
    fn unique_attribute_enforced_at_commit() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item").unique("number"))
            .expect("table");

        let mut first = db.begin();
        let mut second = db.begin();
        first
            .insert_record(&mut Record::new("item").with("number", 7_i64))
            .expect("first insert");
        second
            .insert_record(&mut Record::new("item").with("number", 7_i64))
            .expect("second insert sees no conflict yet");

        first.commit().expect("first commit");
        assert!(matches!(
            second.commit(),
            Err(SequenceError::UniquenessConflict { .. })
        ));
    }

    #[test]
    fn redeclared_table_keeps_pending_primary_keys() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item")).expect("table");

        let mut txn = db.begin();
        let mut a = Record::new("item").with("name", "a");
        txn.insert_record(&mut a).expect("a");
        db.create_table(TableSchema::new("item")).expect("redeclare");
        let mut b = Record::new("item").with("name", "b");
        txn.insert_record(&mut b).expect("b");
        assert_ne!(a.pk(), b.pk());
        txn.commit().expect("commit");

        let txn = db.begin();
        let names: Vec<Option<FieldValue>> = txn
            .records("item")
            .expect("records")
            .iter()
            .map(|r| r.get("name").cloned())
            .collect();
        assert_eq!(
            names,
            vec![Some(FieldValue::from("a")), Some(FieldValue::from("b"))]
        );
    }

    #[test]
    fn redeclaring_keeps_unique_attributes() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item").unique("number"))
            .expect("table");
        let mut txn = db.begin();
        txn.insert_record(&mut Record::new("item").with("number", 1_i64))
            .expect("first");
        txn.commit().expect("commit");

        db.create_table(TableSchema::new("item")).expect("redeclare");
        let mut txn = db.begin();
        assert!(matches!(
            txn.insert_record(&mut Record::new("item").with("number", 1_i64)),
            Err(SequenceError::UniquenessConflict { .. })
        ));
    }

    #[test]
    fn unique_value_freed_by_delete_in_same_transaction() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item").unique("number"))
            .expect("table");
        let mut txn = db.begin();
        let pk = txn
            .insert_record(&mut Record::new("item").with("number", 1_i64))
            .expect("first");
        txn.commit().expect("commit");

        let mut txn = db.begin();
        assert!(txn.delete_record("item", pk).expect("delete"));
        txn.insert_record(&mut Record::new("item").with("number", 1_i64))
            .expect("value is free after delete");
        txn.commit().expect("commit");

        let mut txn = db.begin();
        assert!(matches!(
            txn.insert_record(&mut Record::new("item").with("number", 1_i64)),
            Err(SequenceError::UniquenessConflict { .. })
        ));
    }

    #[test]
    fn committed_update_releases_old_unique_value() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item").unique("number"))
            .expect("table");
        let mut item = Record::new("item").with("number", 1_i64);
        let mut txn = db.begin();
        txn.insert_record(&mut item).expect("insert");
        txn.commit().expect("commit");

        let mut txn = db.begin();
        let moved = item.with("number", 2_i64);
        txn.update_record(&moved).expect("update");
        txn.commit().expect("commit");

        let mut txn = db.begin();
        txn.insert_record(&mut Record::new("item").with("number", 1_i64))
            .expect("old value released");
        assert!(matches!(
            txn.insert_record(&mut Record::new("item").with("number", 2_i64)),
            Err(SequenceError::UniquenessConflict { .. })
        ));
    }

    #[test]
    fn collection_filters_and_orders() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item")).expect("table");
        let mut txn = db.begin();
        for n in [4_i64, 1, 3] {
            txn.insert_record(&mut Record::new("item").with("number", n))
                .expect("insert");
        }
        txn.insert_record(&mut Record::new("item")).expect("unnumbered");

        let values = txn
            .collection("item")
            .ordered_values("number", 1)
            .expect("scan");
        assert_eq!(values, vec![3, 4]);
    }

    #[test]
    fn text_in_counted_attribute_is_invalid() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item")).expect("table");
        let mut txn = db.begin();
        txn.insert_record(&mut Record::new("item").with("number", "x"))
            .expect("insert");

        let result = txn.collection("item").ordered_values("number", 0);
        assert!(matches!(result, Err(SequenceError::InvalidValue(_))));
    }

    #[test]
    fn update_requires_saved_record() {
        let db = Database::in_memory();
        db.create_table(TableSchema::new("item")).expect("table");
        let mut txn = db.begin();
        let result = txn.update_record(&Record::new("item"));
        assert!(matches!(result, Err(SequenceError::InvalidValue(_))));
    }
}
