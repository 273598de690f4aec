//! # Key Evaluator
//!
//! Turns a `Key` description into the string that partitions the counter
//! space. Each distinct string has its own independent sequence.
//!
//! ```text
//! ["repositories", path("repository"), "issues"]  --"."-->  "repositories.17.issues"
//! ```
//!
//! Evaluation is a closed recursion over four variants; nothing is inferred
//! from runtime types.

use crate::primitives::PATH_SEPARATOR;
use crate::{Attribute, Entity, SequenceError};
use std::fmt;
use std::sync::Arc;

/// A computed key segment: called once with the entity, its result is
/// evaluated in turn.
pub type KeyFn = Arc<dyn Fn(&dyn Entity) -> Key + Send + Sync>;

/// Description of a sequence key.
#[derive(Clone)]
pub enum Key {
    /// A fixed segment.
    Literal(String),
    /// An attribute path on the entity, following relations.
    /// A related entity renders as its primary key.
    Path(Vec<String>),
    /// A segment computed from the entity.
    Computed(KeyFn),
    /// Segments evaluated left to right and joined with the separator.
    Composite(Vec<Key>),
}

impl Key {
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Attribute path; `"repository.owner"` follows `repository` then reads `owner`.
    #[must_use]
    pub fn path(dotted: &str) -> Self {
        Self::Path(dotted.split(PATH_SEPARATOR).map(str::to_string).collect())
    }

    #[must_use]
    pub fn computed(f: impl Fn(&dyn Entity) -> Key + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    #[must_use]
    pub fn composite(parts: impl IntoIterator<Item = Key>) -> Self {
        Self::Composite(parts.into_iter().collect())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Path(p) => f.debug_tuple("Path").field(&p.join(".")).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
            Self::Composite(parts) => f.debug_tuple("Composite").field(parts).finish(),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<Vec<Key>> for Key {
    fn from(parts: Vec<Key>) -> Self {
        Self::Composite(parts)
    }
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Stateless key evaluation.
pub struct KeyEvaluator;

impl KeyEvaluator {
    /// Evaluate an optional key. `None` means "no key": the caller skips
    /// allocation.
    pub fn evaluate(
        entity: &dyn Entity,
        key: Option<&Key>,
        separator: &str,
    ) -> Result<Option<String>, SequenceError> {
        key.map(|k| Self::evaluate_key(entity, k, separator))
            .transpose()
    }

    /// Evaluate a key to its string form.
    pub fn evaluate_key(
        entity: &dyn Entity,
        key: &Key,
        separator: &str,
    ) -> Result<String, SequenceError> {
        match key {
            Key::Literal(s) => Ok(s.clone()),
            Key::Path(path) => Self::resolve_path(entity, path),
            Key::Computed(f) => Self::evaluate_key(entity, &f(entity), separator),
            Key::Composite(parts) => {
                let segments = parts
                    .iter()
                    .map(|part| Self::evaluate_key(entity, part, separator))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(segments.join(separator))
            }
        }
    }

    fn resolve_path(entity: &dyn Entity, path: &[String]) -> Result<String, SequenceError> {
        let unresolved = || SequenceError::AttributeResolution {
            entity_type: entity.entity_type().to_string(),
            path: path.join("."),
        };

        let (last, relations) = path.split_last().ok_or_else(unresolved)?;

        let mut related: Option<Arc<dyn Entity>> = None;
        for name in relations {
            let current: &dyn Entity = match &related {
                Some(r) => r.as_ref(),
                None => entity,
            };
            match current.attribute(name) {
                Some(Attribute::Related(next)) => related = Some(next),
                _ => return Err(unresolved()),
            }
        }

        let current: &dyn Entity = match &related {
            Some(r) => r.as_ref(),
            None => entity,
        };
        match current.attribute(last) {
            Some(Attribute::Value(value)) => Ok(value.to_string()),
            Some(Attribute::Related(target)) => Ok(target.primary_key().to_string()),
            None => Err(unresolved()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
