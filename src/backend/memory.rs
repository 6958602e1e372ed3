//! In-memory backend.

use super::Backend;
use crate::error::Result;
use std::collections::BTreeMap;

/// Backend that keeps every table in ordered maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    tables: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate every (table, key, value) triple.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &str, &[u8])> {
        self.tables.iter().flat_map(|(table, rows)| {
            rows.iter()
                .map(move |(key, value)| (table.as_str(), key.as_str(), value.as_slice()))
        })
    }
}

impl Backend for MemoryBackend {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn put(&mut self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &str) -> Result<()> {
        if let Some(rows) = self.tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
