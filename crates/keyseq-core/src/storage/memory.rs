//! In-memory committed rows.

use super::WriteOp;
use crate::lock::{read_recover, write_recover};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Committed rows held in a `BTreeMap` keyed by `(table, key)`.
#[derive(Debug, Default)]
pub struct MemoryRows {
    rows: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryRows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        read_recover(&self.rows, "memory_rows")
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn scan(&self, table: &str) -> Vec<(String, Vec<u8>)> {
        read_recover(&self.rows, "memory_rows")
            .range((table.to_string(), String::new())..)
            .take_while(|((t, _), _)| t == table)
            .map(|((_, key), bytes)| (key.clone(), bytes.clone()))
            .collect()
    }

    /// Apply all writes under one write lock, so readers never observe a
    /// partially applied batch.
    pub fn apply(&self, ops: &[WriteOp]) {
        let mut rows = write_recover(&self.rows, "memory_rows");
        for op in ops {
            match op {
                WriteOp::Put { table, key, bytes } => {
                    rows.insert((table.clone(), key.clone()), bytes.clone());
                }
                WriteOp::Delete { table, key } => {
                    rows.remove(&(table.clone(), key.clone()));
                }
            }
        }
    }
}
