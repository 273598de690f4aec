//! # Engine Primitives
//!
//! Fixed constants of the sequence engine. These are compiled in and
//! immutable at runtime; the only runtime choice is which registered
//! sequence table is active (see `config`).

/// Sequence table used when no setting selects one.
///
/// Every `Database` registers this table when it is opened.
pub const DEFAULT_SEQUENCE_MODEL: &str = "keyseq.sequence";

/// Environment variable that overrides the configured sequence table.
pub const SEQUENCE_MODEL_ENV: &str = "KEYSEQ_SEQUENCE_MODEL";

/// Separator placed between evaluated key segments by default.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Separator between relation names in an attribute path (`"repository.owner"`).
pub const PATH_SEPARATOR: char = '.';

/// Value reported for a key that has never been allocated.
pub const UNSEEN_VALUE: u64 = 0;

/// Value a plain-mode allocation creates a missing row with.
///
/// The created value is returned as-is: the first allocation for a key is 1,
/// not "create at 0 then increment".
pub const FIRST_VALUE: u64 = 1;

/// Magic bytes prefixed to every encoded row.
pub const MAGIC_BYTES: &[u8; 4] = b"KSEQ";

/// Current row encoding version.
///
/// Increment this when making breaking changes to the stored row layout.
pub const FORMAT_VERSION: u8 = 1;

/// Width used to zero-pad record primary keys so storage order equals pk order.
pub const PK_WIDTH: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_well_formed() {
        let parts: Vec<&str> = DEFAULT_SEQUENCE_MODEL.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn first_value_follows_unseen() {
        assert_eq!(FIRST_VALUE, UNSEEN_VALUE + 1);
    }
}
