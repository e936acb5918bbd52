//! In-memory key-value map owned by a replica node.
//!
//! The node task is the only writer, so no lock is needed. On the primary it
//! holds the authoritative data; on a secondary it holds what has been applied
//! from the replication stream so far.

use std::collections::BTreeMap;

use crate::message::{Key, Value};

/// Key-value map of a single node.
///
/// `BTreeMap` keeps iteration order stable, which makes status output and the
/// catch-up batch sent to a newly joined secondary deterministic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KvStore {
    data: BTreeMap<Key, Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    /// Upserts `Some(value)`, deletes on `None`.
    pub fn apply(&mut self, key: Key, value: Option<Value>) {
        match value {
            Some(value) => {
                self.data.insert(key, value);
            }
            None => {
                self.data.remove(&key);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy of every pair, for status reporting.
    pub fn snapshot(&self) -> BTreeMap<Key, Value> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_upserts_and_deletes() {
        let mut store = KvStore::new();
        store.apply("a".into(), Some("1".into()));
        store.apply("a".into(), Some("2".into()));
        assert_eq!(store.get("a"), Some("2".to_string()));

        store.apply("a".into(), None);
        assert_eq!(store.get("a"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn deleting_missing_key_is_a_no_op() {
        let mut store = KvStore::new();
        store.apply("b".into(), Some("1".into()));
        store.apply("missing".into(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn iteration_is_ordered_by_key() {
        let mut store = KvStore::new();
        for key in ["c", "a", "b"] {
            store.apply(key.into(), Some(key.to_uppercase()));
        }
        let keys: Vec<&str> = store.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
