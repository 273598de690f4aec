//! # Allocation Orchestrator
//!
//! Decides, per entity and field, whether and how to allocate a value, and
//! writes it into the entity.
//!
//! ## Modes (checked in this order)
//!
//! 1. **Fill gaps**: reuse the lowest hole in the counted collection.
//! 2. **Repair**: resume above the stored counter, skipping values that
//!    already exist (heals a counter that was reset or deleted externally).
//! 3. **Plain**: increment the counter under its row lock.
//!
//! Fill-gaps and repair scan the collection without locks before writing
//! the counter. Concurrent allocations on the same key can compute the same
//! value; a unique constraint on the field then rejects one of the writes
//! with `SequenceError::UniquenessConflict`. They suit low-concurrency or
//! background use. Plain mode is safe under any concurrency.

use crate::database::Transaction;
use crate::gap::{CountedCollection, GapResolver};
use crate::key::{Key, KeyEvaluator};
use crate::primitives::{DEFAULT_SEPARATOR, UNSEEN_VALUE};
use crate::sequence::SequenceStore;
use crate::{Attribute, Entity, FieldValue, SequenceError};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// FIELD DESCRIPTOR
// =============================================================================

/// A boolean option that may depend on the entity being saved.
#[derive(Clone)]
pub enum Toggle {
    Static(bool),
    Dynamic(Arc<dyn Fn(&dyn Entity) -> bool + Send + Sync>),
}

impl Toggle {
    /// Build a per-entity predicate.
    #[must_use]
    pub fn when(f: impl Fn(&dyn Entity) -> bool + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    #[must_use]
    pub fn resolve(&self, entity: &dyn Entity) -> bool {
        match self {
            Self::Static(b) => *b,
            Self::Dynamic(f) => f(entity),
        }
    }
}

impl Default for Toggle {
    fn default() -> Self {
        Self::Static(false)
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        Self::Static(value)
    }
}

impl fmt::Debug for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(b) => f.debug_tuple("Static").field(b).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Where a field's sequence key comes from.
#[derive(Debug, Clone, Default)]
pub enum FieldKey {
    /// The entity's table name (one sequence per table).
    #[default]
    TableName,
    /// No key: the field is never allocated.
    Disabled,
    /// A custom key.
    Custom(Key),
}

/// Declaration of a sequence-assigned field.
#[derive(Debug, Clone)]
pub struct SequenceField {
    name: String,
    key: FieldKey,
    separator: String,
    nowait: bool,
    fill_gaps: Toggle,
    resolve_integrity_errors: Toggle,
    default: Option<FieldValue>,
}

impl SequenceField {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: FieldKey::TableName,
            separator: DEFAULT_SEPARATOR.to_string(),
            nowait: false,
            fill_gaps: Toggle::default(),
            resolve_integrity_errors: Toggle::default(),
            default: None,
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = FieldKey::Custom(key.into());
        self
    }

    #[must_use]
    pub fn without_key(mut self) -> Self {
        self.key = FieldKey::Disabled;
        self
    }

    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Fail with `WouldBlock` instead of waiting for the counter lock.
    #[must_use]
    pub fn nowait(mut self, nowait: bool) -> Self {
        self.nowait = nowait;
        self
    }

    #[must_use]
    pub fn fill_gaps(mut self, toggle: impl Into<Toggle>) -> Self {
        self.fill_gaps = toggle.into();
        self
    }

    #[must_use]
    pub fn resolve_integrity_errors(mut self, toggle: impl Into<Toggle>) -> Self {
        self.resolve_integrity_errors = toggle.into();
        self
    }

    /// A field with a default is populated by its default, never by a sequence.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Strategy used for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    Plain,
    FillGaps,
    Repair,
}

/// Why a field was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The attribute already holds a value.
    AlreadySet,
    /// The field declares a default.
    HasDefault,
    /// The key is absent or evaluated to an empty string.
    NoKey,
}

/// Result of one allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    Allocated {
        key: String,
        value: u64,
        mode: AllocationMode,
    },
    Skipped(SkipReason),
}

impl Allocation {
    /// The allocated value, if any.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Allocated { value, .. } => Some(*value),
            Self::Skipped(_) => None,
        }
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Allocated { .. })
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

/// Stateless allocation entry points.
pub struct Allocator;

impl Allocator {
    /// Allocate `field` on `entity`, scanning the entity's own table for
    /// gap-fill and repair modes.
    pub fn allocate(
        txn: &mut Transaction<'_>,
        store: &SequenceStore,
        entity: &mut dyn Entity,
        field: &SequenceField,
    ) -> Result<Allocation, SequenceError> {
        Self::run(txn, store, entity, field, None)
    }

    /// Allocate `field` on `entity`, scanning `collection` for gap-fill and
    /// repair modes. Use this when the counted entities live outside the
    /// bundled store.
    pub fn allocate_with(
        txn: &mut Transaction<'_>,
        store: &SequenceStore,
        entity: &mut dyn Entity,
        field: &SequenceField,
        collection: &dyn CountedCollection,
    ) -> Result<Allocation, SequenceError> {
        Self::run(txn, store, entity, field, Some(collection))
    }

    /// Pick the strategy for this entity.
    #[must_use]
    pub fn select_mode(field: &SequenceField, entity: &dyn Entity) -> AllocationMode {
        if field.fill_gaps.resolve(entity) {
            AllocationMode::FillGaps
        } else if field.resolve_integrity_errors.resolve(entity) {
            AllocationMode::Repair
        } else {
            AllocationMode::Plain
        }
    }

    fn run(
        txn: &mut Transaction<'_>,
        store: &SequenceStore,
        entity: &mut dyn Entity,
        field: &SequenceField,
        collection: Option<&dyn CountedCollection>,
    ) -> Result<Allocation, SequenceError> {
        match entity.attribute(&field.name) {
            Some(Attribute::Related(_)) => return Ok(Allocation::Skipped(SkipReason::AlreadySet)),
            Some(Attribute::Value(v)) if !v.is_null() => {
                return Ok(Allocation::Skipped(SkipReason::AlreadySet));
            }
            _ => {}
        }
        if field.default.is_some() {
            return Ok(Allocation::Skipped(SkipReason::HasDefault));
        }

        let table_key;
        let key = match &field.key {
            FieldKey::TableName => {
                table_key = Key::literal(entity.entity_type());
                Some(&table_key)
            }
            FieldKey::Disabled => None,
            FieldKey::Custom(key) => Some(key),
        };
        let key = match KeyEvaluator::evaluate(&*entity, key, &field.separator)? {
            Some(key) if !key.is_empty() => key,
            _ => return Ok(Allocation::Skipped(SkipReason::NoKey)),
        };

        let mode = Self::select_mode(field, &*entity);
        let value = match mode {
            AllocationMode::FillGaps => {
                let current =
                    Self::resolve_gap(txn, &*entity, &field.name, UNSEEN_VALUE, collection)?;
                let value = successor(current, &key)?;
                store.set_current_value(txn, &key, value, field.nowait)?;
                value
            }
            AllocationMode::Repair => {
                let floor = store.current_value(txn, &key)?;
                let current = Self::resolve_gap(txn, &*entity, &field.name, floor, collection)?;
                let value = successor(current, &key)?;
                store.set_current_value(txn, &key, value, field.nowait)?;
                value
            }
            AllocationMode::Plain => store.next_value(txn, &key, field.nowait)?,
        };

        entity.set_attribute(&field.name, FieldValue::from_sequence(value)?);
        debug!(
            entity_type = entity.entity_type(),
            field = %field.name,
            key = %key,
            value,
            mode = ?mode,
            "allocated sequence value"
        );
        Ok(Allocation::Allocated { key, value, mode })
    }

    fn resolve_gap(
        txn: &Transaction<'_>,
        entity: &dyn Entity,
        attribute: &str,
        floor: u64,
        collection: Option<&dyn CountedCollection>,
    ) -> Result<u64, SequenceError> {
        match collection {
            Some(collection) => GapResolver::find_allocation(collection, attribute, floor),
            None => {
                let own_table = txn.collection(entity.entity_type());
                GapResolver::find_allocation(&own_table, attribute, floor)
            }
        }
    }
}

fn successor(current: u64, key: &str) -> Result<u64, SequenceError> {
    current
        .checked_add(1)
        .ok_or_else(|| SequenceError::InvalidValue(format!("sequence '{key}' is exhausted")))
}

// =============================================================================
// TESTS
// =============================================================================
