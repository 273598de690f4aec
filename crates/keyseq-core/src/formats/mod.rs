//! # Stored Row Formats
//!
//! Byte encoding for rows written to a storage backend.

pub mod persistence;

pub use persistence::{MAX_ROW_SIZE, decode_row, encode_row};
