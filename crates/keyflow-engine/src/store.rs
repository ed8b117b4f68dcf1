use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use keyflow_core::types::Record;

/// Current value of every key written during a run.
///
/// A key is present once it has been written, even if the written sequence
/// was empty. Writes overwrite; there is no history here (that lives in the
/// run log).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStore {
    data: HashMap<String, Vec<Record>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored under `key`, or `None` if it was never written.
    pub fn get(&self, key: &str) -> Option<&[Record]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Whether `key` has been written.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// All written keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Concatenate the records of `keys` in the given order.
    ///
    /// Returns `None` unless every key is present.
    pub fn gather(&self, keys: &[String]) -> Option<Vec<Record>> {
        let mut records = Vec::new();
        for key in keys {
            records.extend(self.data.get(key)?.iter().cloned());
        }
        Some(records)
    }

    /// Overwrite `key`. Only the executor writes, so every write is logged.
    pub(crate) fn insert(&mut self, key: impl Into<String>, records: Vec<Record>) {
        self.data.insert(key.into(), records);
    }
}
