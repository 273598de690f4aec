//! # Core Type Definitions
//!
//! This module contains the shared types of the sequence engine:
//! - Attribute values (`FieldValue`) and resolved attributes (`Attribute`)
//! - The `Entity` trait implemented by everything a sequence is assigned to
//! - The bundled `Record` entity
//! - The persisted counter row (`SequenceRow`)
//! - Error types (`SequenceError`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// FIELD VALUES
// =============================================================================

/// A scalar attribute value.
///
/// Relations are not values: they surface as `Attribute::Related` and are
/// persisted as the primary key of the related entity.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FieldValue {
    /// Check whether the value is `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Interpret the value as a sequence number.
    ///
    /// Returns `None` for `Null`, negative integers and non-integer values.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Build an integer value from a sequence number.
    pub fn from_sequence(value: u64) -> Result<Self, SequenceError> {
        i64::try_from(value)
            .map(Self::Int)
            .map_err(|_| SequenceError::InvalidValue(format!("sequence value {value} overflows")))
    }
}

/// Key segments render values with `Display`.
///
/// `Null` renders as `None` and booleans as `True` / `False`, so an unsaved
/// relation still yields a distinct, non-empty key segment.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// A resolved attribute of an entity.
#[derive(Clone)]
pub enum Attribute {
    /// A plain scalar value.
    Value(FieldValue),
    /// A related entity (a foreign key that has been followed).
    Related(Arc<dyn Entity>),
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Related(e) => f
                .debug_struct("Related")
                .field("entity_type", &e.entity_type())
                .field("primary_key", &e.primary_key())
                .finish(),
        }
    }
}

/// A member of a counted collection.
///
/// The engine reads attributes to evaluate keys, and writes exactly one
/// attribute (the sequence field) when it allocates.
pub trait Entity: Send + Sync {
    /// The type name, which is also the table the entity is persisted in.
    fn entity_type(&self) -> &str;

    /// The primary key, or `Null` while the entity is unsaved.
    fn primary_key(&self) -> FieldValue;

    /// Look up an attribute by name. `None` means the attribute does not exist.
    fn attribute(&self, name: &str) -> Option<Attribute>;

    /// Assign a scalar attribute.
    fn set_attribute(&mut self, name: &str, value: FieldValue);
}

// =============================================================================
// RECORD
// =============================================================================

/// The bundled `Entity` implementation: a named bag of attributes.
///
/// Relations hold the related record in memory; when the record is stored
/// only the related primary key is kept under the relation name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entity_type: String,
    pk: Option<i64>,
    fields: BTreeMap<String, FieldValue>,
    relations: BTreeMap<String, Arc<Record>>,
}

impl Record {
    /// Create an unsaved record of the given type.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Self::default()
        }
    }

    /// Builder: set a scalar field.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder: attach a related record.
    #[must_use]
    pub fn with_related(mut self, name: impl Into<String>, related: Arc<Record>) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), related.primary_key());
        self.relations.insert(name, related);
        self
    }

    /// Primary key assigned by the store, if saved.
    #[must_use]
    pub const fn pk(&self) -> Option<i64> {
        self.pk
    }

    pub(crate) fn set_pk(&mut self, pk: i64) {
        self.pk = Some(pk);
    }

    /// Read a scalar field (relations read as their primary key).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Reset a field to `Null`, leaving it eligible for allocation again.
    pub fn clear(&mut self, name: &str) {
        self.relations.remove(name);
        self.fields.insert(name.to_string(), FieldValue::Null);
    }

    pub(crate) fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub(crate) fn from_parts(
        entity_type: String,
        pk: i64,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            entity_type,
            pk: Some(pk),
            fields,
            relations: BTreeMap::new(),
        }
    }
}

impl Entity for Record {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn primary_key(&self) -> FieldValue {
        self.pk.map(FieldValue::Int).unwrap_or_default()
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        if let Some(related) = self.relations.get(name) {
            return Some(Attribute::Related(Arc::clone(related) as Arc<dyn Entity>));
        }
        self.fields.get(name).cloned().map(Attribute::Value)
    }

    fn set_attribute(&mut self, name: &str, value: FieldValue) {
        self.relations.remove(name);
        self.fields.insert(name.to_string(), value);
    }
}

// =============================================================================
// SEQUENCE ROW
// =============================================================================

/// One row of a sequence table: the current high-water mark for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRow {
    pub key: String,
    pub value: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceRow {
    /// Create a fresh row stamped with the current time.
    #[must_use]
    pub fn new(key: impl Into<String>, value: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the value and bump `updated_at`.
    pub fn touch(&mut self, value: u64) {
        self.value = value;
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for SequenceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the sequence engine.
///
/// - No silent failures and no retries: every error reaches the caller
/// - The engine never panics; the caller decides whether to retry the write
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The configured sequence table is malformed or not registered.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A key segment referenced an attribute path that does not resolve.
    #[error("Cannot resolve attribute path '{path}' on {entity_type}")]
    AttributeResolution { entity_type: String, path: String },

    /// A non-blocking lock request found the row locked by another transaction.
    #[error("Row '{key}' in {table} is locked by another transaction")]
    WouldBlock { table: String, key: String },

    /// Waiting for the row lock would deadlock with another transaction.
    #[error("Deadlock waiting for row '{key}' in {table}")]
    Deadlock { table: String, key: String },

    /// A unique attribute would hold the same value on two rows.
    #[error("Duplicate value {value} for unique attribute {table}.{attribute}")]
    UniquenessConflict {
        table: String,
        attribute: String,
        value: FieldValue,
    },

    /// The named table has not been created or registered.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// No record with this primary key exists.
    #[error("Record not found: {table}#{pk}")]
    RecordNotFound { table: String, pk: i64 },

    /// A value cannot be used as a sequence number.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred in the storage backend.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
