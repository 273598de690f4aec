//! # keyseq-core
//!
//! Per-key integer sequences backed by a row-locked counter table.
//!
//! A sequence field on an entity receives the next value for its key when
//! the entity is about to be persisted. Keys partition the counter space:
//! `"repositories.17.issues"` and `"repositories.18.issues"` count
//! independently.
//!
//! ## Allocation modes
//!
//! - **Plain**: increment the counter under an exclusive row lock. Safe
//!   under any number of concurrent writers.
//! - **Fill gaps**: reuse the lowest hole left by deleted entities.
//! - **Repair**: resume above a counter that was reset or lowered
//!   externally, skipping values already in use.
//!
//! ## Architectural Constraints
//!
//! - The engine joins the caller's `Transaction`: the counter write commits
//!   or rolls back together with the entity write
//! - Blocking by default; `nowait` fails fast instead of waiting
//! - No global state: the field registry and the active sequence table are
//!   built explicitly and passed in
//! - NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod allocator;
pub mod config;
pub mod database;
pub mod formats;
pub mod gap;
pub mod key;
mod lock;
pub mod primitives;
pub mod registry;
pub mod sequence;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Attribute, Entity, FieldValue, Record, SequenceError, SequenceRow};

// =============================================================================
// RE-EXPORTS: Allocation Engine
// =============================================================================

pub use allocator::{
    Allocation, AllocationMode, Allocator, FieldKey, SequenceField, SkipReason, Toggle,
};
pub use gap::{CountedCollection, GapResolver};
pub use key::{Key, KeyEvaluator, KeyFn};
pub use sequence::SequenceStore;

// =============================================================================
// RE-EXPORTS: Wiring
// =============================================================================

pub use config::{SequenceModel, Settings};
pub use registry::{FieldRegistry, PersistReport, SequenceHook};

// =============================================================================
// RE-EXPORTS: Bundled Store
// =============================================================================

pub use database::{Database, TableCollection, TableSchema, Transaction};
pub use storage::StorageBackend;
