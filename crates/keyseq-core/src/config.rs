//! # Configuration
//!
//! Selects the active sequence table.
//!
//! Resolution order for the table name:
//! 1. `KEYSEQ_SEQUENCE_MODEL` in the environment (when overrides are applied)
//! 2. `sequence_model` in the TOML settings
//! 3. `keyseq.sequence`, which every `Database` registers at open
//!
//! ```toml
//! sequence_model = "billing.counter"
//! ```
//!
//! The resolved handle is immutable. `SequenceModel::reload` re-reads the
//! settings and swaps the handle only if the new name resolves.

use crate::database::{Database, validate_model_name};
use crate::lock::{read_recover, write_recover};
use crate::primitives::{DEFAULT_SEQUENCE_MODEL, SEQUENCE_MODEL_ENV};
use crate::sequence::SequenceStore;
use crate::SequenceError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

// =============================================================================
// SETTINGS
// =============================================================================

/// Engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Sequence table in `app_label.model_name` form.
    pub sequence_model: Option<String>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, SequenceError> {
        toml::from_str(contents).map_err(|e| SequenceError::Configuration(e.to_string()))
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SequenceError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SequenceError::IoError(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults with the process environment applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    #[must_use]
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup(SEQUENCE_MODEL_ENV) {
            self.sequence_model = Some(model);
        }
        self
    }

    /// The configured table name, or the built-in default when unset or empty.
    #[must_use]
    pub fn sequence_model_name(&self) -> &str {
        match self.sequence_model.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_SEQUENCE_MODEL,
        }
    }
}

// =============================================================================
// ACTIVE MODEL
// =============================================================================

/// The resolved, active sequence table.
#[derive(Debug)]
pub struct SequenceModel {
    store: RwLock<Arc<SequenceStore>>,
}

impl SequenceModel {
    /// Resolve the configured table against `db`.
    ///
    /// Fails with `Configuration` if the name is malformed or the table has
    /// not been registered.
    pub fn resolve(db: &Database, settings: &Settings) -> Result<Self, SequenceError> {
        let store = Self::bind(db, settings)?;
        info!(table = store.table(), "resolved sequence model");
        Ok(Self {
            store: RwLock::new(Arc::new(store)),
        })
    }

    /// Bind directly to the default table.
    pub fn default_for(db: &Database) -> Result<Self, SequenceError> {
        Self::resolve(db, &Settings::default())
    }

    /// The active store handle.
    #[must_use]
    pub fn current(&self) -> Arc<SequenceStore> {
        Arc::clone(&read_recover(&self.store, "sequence model"))
    }

    /// Re-resolve from `settings`. On failure the previous handle stays active.
    pub fn reload(&self, db: &Database, settings: &Settings) -> Result<(), SequenceError> {
        let store = match Self::bind(db, settings) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "sequence model reload failed; keeping previous table");
                return Err(e);
            }
        };
        info!(table = store.table(), "reloaded sequence model");
        *write_recover(&self.store, "sequence model") = Arc::new(store);
        Ok(())
    }

    fn bind(db: &Database, settings: &Settings) -> Result<SequenceStore, SequenceError> {
        let name = settings.sequence_model_name();
        validate_model_name(name)?;
        if !db.has_sequence_table(name) {
            return Err(SequenceError::Configuration(format!(
                "{SEQUENCE_MODEL_ENV} refers to sequence model '{name}' that has not been registered"
            )));
        }
        db.sequence_store(name)
    }
}

// =============================================================================
// TESTS
// =============================================================================
