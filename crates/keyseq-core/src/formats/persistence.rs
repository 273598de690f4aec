//! # Row Encoding
//!
//! Binary encoding for stored rows (sequence rows and records).
//!
//! ```text
//! +--------+---------+---------------------+
//! | "KSEQ" | version | postcard(row)       |
//! | 4 B    | 1 B     | rest                |
//! +--------+---------+---------------------+
//! ```
//!
//! Both backends store the same bytes, so a row written by the in-memory
//! backend decodes identically to one read back from redb.

use crate::SequenceError;
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum encoded size of a single row.
///
/// Validated before deserialization so a corrupted length cannot drive a
/// large allocation.
pub const MAX_ROW_SIZE: usize = 16 * 1024 * 1024;

/// Prefix length: magic plus one version byte.
const PREFIX_LEN: usize = MAGIC_BYTES.len() + 1;

fn corrupt(reason: impl Into<String>) -> SequenceError {
    SequenceError::SerializationError(reason.into())
}

/// Encode a row as prefix + postcard payload.
pub fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, SequenceError> {
    let mut bytes = Vec::with_capacity(PREFIX_LEN + 32);
    bytes.extend_from_slice(MAGIC_BYTES);
    bytes.push(FORMAT_VERSION);
    postcard::to_extend(row, bytes).map_err(|e| corrupt(e.to_string()))
}

/// Decode a row produced by `encode_row`.
///
/// Size, magic and version are checked before the payload is touched.
pub fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SequenceError> {
    if bytes.len() > MAX_ROW_SIZE {
        return Err(corrupt(format!(
            "row of {} bytes exceeds the {MAX_ROW_SIZE} byte limit",
            bytes.len()
        )));
    }

    let payload = match bytes.split_first_chunk::<4>() {
        Some((magic, rest)) if magic == MAGIC_BYTES => rest,
        Some(_) => return Err(corrupt("row does not start with KSEQ")),
        None => return Err(corrupt("row shorter than its prefix")),
    };
    let payload = match payload.split_first() {
        Some((&FORMAT_VERSION, rest)) => rest,
        Some((version, _)) => {
            return Err(corrupt(format!(
                "row format v{version} is not supported (this build reads v{FORMAT_VERSION})"
            )));
        }
        None => return Err(corrupt("row shorter than its prefix")),
    };

    postcard::from_bytes(payload).map_err(|e| corrupt(format!("undecodable row: {e}")))
}

// =============================================================================
// TESTS
// =============================================================================
