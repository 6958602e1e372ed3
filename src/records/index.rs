//! Secondary indices for efficient lookups.

use crate::types::{Handle, IndexKind};
use std::collections::{BTreeMap, BTreeSet};

/// Derived-key to handle mapping for one index of one record class.
///
/// Several records may share a key (two people with the same surname), so
/// each key maps to a set of handles. Iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    kind: IndexKind,
    entries: BTreeMap<String, BTreeSet<Handle>>,
}

impl SecondaryIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Index a payload under `handle`.
    pub fn insert_payload(&mut self, handle: &Handle, payload: &[u8]) {
        if let Some(key) = self.kind.extract(payload) {
            self.entries.entry(key).or_default().insert(handle.clone());
        }
    }

    /// Drop the entry a payload contributed under `handle`.
    pub fn remove_payload(&mut self, handle: &Handle, payload: &[u8]) {
        if let Some(key) = self.kind.extract(payload) {
            if let Some(handles) = self.entries.get_mut(&key) {
                handles.remove(handle);
                if handles.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Handles stored under `key`, in handle order.
    pub fn lookup(&self, key: &str) -> Vec<Handle> {
        self.entries
            .get(key)
            .map(|handles| handles.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Distinct keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of (key, handle) pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str, surname: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({"gramps_id": id, "surname": surname})).unwrap()
    }

    #[test]
    fn test_duplicate_keys() {
        let mut index = SecondaryIndex::new(IndexKind::Surname);
        index.insert_payload(&Handle::from("h1"), &person("I1", "Smith"));
        index.insert_payload(&Handle::from("h2"), &person("I2", "Smith"));
        index.insert_payload(&Handle::from("h3"), &person("I3", "Jones"));

        assert_eq!(index.lookup("Smith"), vec![Handle::from("h1"), Handle::from("h2")]);
        assert_eq!(index.keys(), vec!["Jones".to_string(), "Smith".to_string()]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_remove_drops_empty_keys() {
        let mut index = SecondaryIndex::new(IndexKind::GrampsId);
        let payload = person("I7", "Ward");
        index.insert_payload(&Handle::from("h"), &payload);
        assert!(index.contains_key("I7"));

        index.remove_payload(&Handle::from("h"), &payload);
        assert!(!index.contains_key("I7"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_payload_without_key_is_ignored() {
        let mut index = SecondaryIndex::new(IndexKind::GrampsId);
        index.insert_payload(&Handle::from("n"), b"\x00\x01");
        assert!(index.is_empty());
    }
}
