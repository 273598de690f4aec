//! # Field Registry
//!
//! Explicit table from entity type to its sequence fields, and the
//! `before_persist` hook that runs them.
//!
//! Nothing registers itself: callers build a `FieldRegistry` at startup and
//! hand it to a `SequenceHook`. A subtype registered with
//! `register_subtype` carries its parent's fields ahead of its own. The
//! default key is still the subtype's own table name; parent and children
//! draw from one counter only when the field declares an explicit key.

use crate::allocator::{Allocation, Allocator, SequenceField};
use crate::config::SequenceModel;
use crate::database::Transaction;
use crate::{Entity, Record, SequenceError};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: BTreeMap<String, Vec<SequenceField>>,
    parents: BTreeMap<String, String>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a sequence field on `entity_type`. Fields run in registration order.
    pub fn register(&mut self, entity_type: impl Into<String>, field: SequenceField) -> &mut Self {
        self.fields.entry(entity_type.into()).or_default().push(field);
        self
    }

    /// Declare `child` as a subtype of `parent`.
    pub fn register_subtype(
        &mut self,
        child: impl Into<String>,
        parent: impl Into<String>,
    ) -> Result<&mut Self, SequenceError> {
        let child = child.into();
        let parent = parent.into();
        if self.ancestors(&parent).any(|a| a == child) {
            return Err(SequenceError::Configuration(format!(
                "'{child}' cannot inherit from its own subtype '{parent}'"
            )));
        }
        self.parents.insert(child, parent);
        Ok(self)
    }

    /// Fields that apply to `entity_type`: the root ancestor's first.
    #[must_use]
    pub fn fields_for(&self, entity_type: &str) -> Vec<&SequenceField> {
        let mut lineage: Vec<&str> = self.ancestors(entity_type).collect();
        lineage.reverse();
        lineage
            .into_iter()
            .filter_map(|t| self.fields.get(t))
            .flatten()
            .collect()
    }

    /// `entity_type` followed by its ancestors, nearest first.
    fn ancestors<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let limit = self.parents.len().saturating_add(1);
        std::iter::successors(Some(entity_type), |t| {
            self.parents.get(*t).map(String::as_str)
        })
        .take(limit)
    }
}

// =============================================================================
// PERSIST HOOK
// =============================================================================

/// Outcome of one `before_persist` call, per field in run order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    outcomes: Vec<(String, Allocation)>,
}

impl PersistReport {
    /// Whether any field received a value.
    #[must_use]
    pub fn allocated(&self) -> bool {
        self.outcomes.iter().any(|(_, a)| a.is_allocated())
    }

    /// Value allocated to `field`, if it was allocated.
    #[must_use]
    pub fn value_of(&self, field: &str) -> Option<u64> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == field)
            .and_then(|(_, a)| a.value())
    }

    #[must_use]
    pub fn outcomes(&self) -> &[(String, Allocation)] {
        &self.outcomes
    }
}

/// Runs registered sequence fields before an entity is persisted.
#[derive(Debug)]
pub struct SequenceHook {
    registry: FieldRegistry,
    model: Arc<SequenceModel>,
}

impl SequenceHook {
    #[must_use]
    pub fn new(registry: FieldRegistry, model: Arc<SequenceModel>) -> Self {
        Self { registry, model }
    }

    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Allocate every registered field of `entity` inside `txn`.
    ///
    /// Stops at the first error; the caller should roll back.
    pub fn before_persist(
        &self,
        txn: &mut Transaction<'_>,
        entity: &mut dyn Entity,
    ) -> Result<PersistReport, SequenceError> {
        let store = self.model.current();
        let fields = self.registry.fields_for(entity.entity_type());
        let mut report = PersistReport::default();
        for field in fields {
            let outcome = Allocator::allocate(txn, &store, entity, field)?;
            report.outcomes.push((field.name().to_string(), outcome));
        }
        Ok(report)
    }

    /// Run `before_persist`, then insert the record (or update it if it
    /// already has a primary key) in the same transaction.
    pub fn save(
        &self,
        txn: &mut Transaction<'_>,
        record: &mut Record,
    ) -> Result<PersistReport, SequenceError> {
        let report = self.before_persist(txn, record)?;
        if record.pk().is_some() {
            txn.update_record(record)?;
        } else {
            txn.insert_record(record)?;
        }
        Ok(report)
    }
}

// =============================================================================
// TESTS
// =============================================================================
