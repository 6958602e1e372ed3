//! Primary record tables and synchronous index maintenance.

use super::SecondaryIndex;
use crate::backend::{Backend, METADATA_TABLE};
use crate::error::{Result, StoreError};
use crate::types::{Handle, Hash, IndexKind, RecordClass};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Record tables for every class, backed by a [`Backend`].
///
/// Every write updates the declared secondary indices of its class in the
/// same call, unless indexing for that class is suspended (batch mode), in
/// which case [`RecordTables::rebuild`] must run before the indices are
/// consulted again.
pub struct RecordTables {
    backend: Box<dyn Backend>,
    indices: BTreeMap<(RecordClass, IndexKind), SecondaryIndex>,
    suspended: HashSet<RecordClass>,
}

impl RecordTables {
    /// Wrap a backend and build all indices from its primary data.
    pub fn new(backend: Box<dyn Backend>) -> Result<Self> {
        let mut indices = BTreeMap::new();
        for class in RecordClass::ALL {
            for &kind in class.indices() {
                indices.insert((class, kind), SecondaryIndex::new(kind));
            }
        }

        let mut tables = Self {
            backend,
            indices,
            suspended: HashSet::new(),
        };
        for class in RecordClass::ALL {
            tables.rebuild(class)?;
        }
        Ok(tables)
    }

    // --- Reads ---

    /// Fetch a record, failing with `NotFound` if absent.
    pub fn get(&self, class: RecordClass, handle: &Handle) -> Result<Vec<u8>> {
        self.try_get(class, handle)?
            .ok_or_else(|| StoreError::not_found(class, handle))
    }

    pub fn try_get(&self, class: RecordClass, handle: &Handle) -> Result<Option<Vec<u8>>> {
        self.backend.get(class.name(), handle.as_str())
    }

    pub fn contains(&self, class: RecordClass, handle: &Handle) -> Result<bool> {
        Ok(self.try_get(class, handle)?.is_some())
    }

    /// All handles of a class, sorted.
    pub fn handles(&self, class: RecordClass) -> Result<Vec<Handle>> {
        Ok(self
            .backend
            .scan(class.name())?
            .into_iter()
            .map(|(key, _)| Handle::new(key))
            .collect())
    }

    /// All (handle, payload) pairs of a class, sorted by handle.
    pub fn records(&self, class: RecordClass) -> Result<Vec<(Handle, Vec<u8>)>> {
        Ok(self
            .backend
            .scan(class.name())?
            .into_iter()
            .map(|(key, value)| (Handle::new(key), value))
            .collect())
    }

    pub fn count(&self, class: RecordClass) -> Result<usize> {
        Ok(self.backend.scan(class.name())?.len())
    }

    pub fn index(&self, class: RecordClass, kind: IndexKind) -> Option<&SecondaryIndex> {
        self.indices.get(&(class, kind))
    }

    // --- Writes ---

    /// Insert a new record. Fails with `DuplicateHandle` if it exists.
    pub fn add(&mut self, class: RecordClass, handle: &Handle, value: &[u8]) -> Result<()> {
        if self.contains(class, handle)? {
            return Err(StoreError::duplicate(class, handle));
        }
        self.backend.put(class.name(), handle.as_str(), value)?;
        self.index_insert(class, handle, value);
        Ok(())
    }

    /// Overwrite an existing record, returning its previous payload.
    /// Fails with `NotFound` if absent.
    pub fn put(&mut self, class: RecordClass, handle: &Handle, value: &[u8]) -> Result<Vec<u8>> {
        let old = self.get(class, handle)?;
        self.backend.put(class.name(), handle.as_str(), value)?;
        self.index_remove(class, handle, &old);
        self.index_insert(class, handle, value);
        Ok(old)
    }

    /// Delete a record, returning its payload. Fails with `NotFound` if absent.
    pub fn remove(&mut self, class: RecordClass, handle: &Handle) -> Result<Vec<u8>> {
        let old = self.get(class, handle)?;
        self.backend.delete(class.name(), handle.as_str())?;
        self.index_remove(class, handle, &old);
        Ok(old)
    }

    /// Force a record to `value` (`None` deletes), whatever its current state.
    ///
    /// Used to replay history; indices are adjusted from the current
    /// pre-image rather than recomputed.
    pub fn write(&mut self, class: RecordClass, handle: &Handle, value: Option<&[u8]>) -> Result<()> {
        let old = self.try_get(class, handle)?;
        match value {
            Some(value) => self.backend.put(class.name(), handle.as_str(), value)?,
            None => self.backend.delete(class.name(), handle.as_str())?,
        }
        if let Some(old) = &old {
            self.index_remove(class, handle, old);
        }
        if let Some(value) = value {
            self.index_insert(class, handle, value);
        }
        Ok(())
    }

    // --- Index maintenance ---

    /// Recompute every index of `class` from primary data.
    pub fn rebuild(&mut self, class: RecordClass) -> Result<()> {
        let records = self.records(class)?;
        for &kind in class.indices() {
            if let Some(index) = self.indices.get_mut(&(class, kind)) {
                index.clear();
                for (handle, payload) in &records {
                    index.insert_payload(handle, payload);
                }
            }
        }
        self.suspended.remove(&class);
        debug!(%class, records = records.len(), "rebuilt secondary indices");
        Ok(())
    }

    /// Stop incremental index maintenance for `class` until the next rebuild.
    pub fn suspend_indexing(&mut self, class: RecordClass) {
        self.suspended.insert(class);
    }

    /// Resume incremental maintenance without a rebuild. Only valid while
    /// nothing has been written to `class` since it was suspended.
    pub fn resume_indexing(&mut self, class: RecordClass) {
        self.suspended.remove(&class);
    }

    pub fn is_indexing_suspended(&self, class: RecordClass) -> bool {
        self.suspended.contains(&class)
    }

    fn index_insert(&mut self, class: RecordClass, handle: &Handle, payload: &[u8]) {
        if self.suspended.contains(&class) {
            return;
        }
        for &kind in class.indices() {
            if let Some(index) = self.indices.get_mut(&(class, kind)) {
                index.insert_payload(handle, payload);
            }
        }
    }

    fn index_remove(&mut self, class: RecordClass, handle: &Handle, payload: &[u8]) {
        if self.suspended.contains(&class) {
            return;
        }
        for &kind in class.indices() {
            if let Some(index) = self.indices.get_mut(&(class, kind)) {
                index.remove_payload(handle, payload);
            }
        }
    }

    // --- Metadata ---

    pub fn metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(METADATA_TABLE, key)
    }

    pub fn set_metadata(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.backend.put(METADATA_TABLE, key, value)
    }

    // --- Whole-store ---

    /// SHA-256 over every class's sorted (handle, payload) pairs.
    pub fn digest(&self) -> Result<Hash> {
        let mut hasher = Sha256::new();
        for class in RecordClass::ALL {
            hasher.update(class.name().as_bytes());
            for (handle, payload) in self.records(class)? {
                hasher.update((handle.as_str().len() as u32).to_le_bytes());
                hasher.update(handle.as_str().as_bytes());
                hasher.update((payload.len() as u32).to_le_bytes());
                hasher.update(&payload);
            }
        }
        Ok(Hash(hasher.finalize().into()))
    }

    /// Make every write since the previous seal durable as one unit.
    pub fn seal(&mut self) -> Result<()> {
        self.backend.commit()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }

    pub fn compact(&mut self) -> Result<()> {
        self.backend.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn tables() -> RecordTables {
        RecordTables::new(Box::new(MemoryBackend::new())).unwrap()
    }

    fn person(id: &str, surname: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({"gramps_id": id, "surname": surname})).unwrap()
    }

    #[test]
    fn test_add_get_duplicate() {
        let mut t = tables();
        let h = Handle::from("p1");
        t.add(RecordClass::Person, &h, &person("I1", "Abbott")).unwrap();
        assert_eq!(t.get(RecordClass::Person, &h).unwrap(), person("I1", "Abbott"));

        let dup = t.add(RecordClass::Person, &h, b"{}");
        assert!(matches!(dup, Err(StoreError::DuplicateHandle { .. })));

        // Same handle in another class is independent.
        t.add(RecordClass::Family, &h, b"{}").unwrap();
    }

    #[test]
    fn test_put_and_remove_require_existing() {
        let mut t = tables();
        let h = Handle::from("missing");
        assert!(matches!(
            t.put(RecordClass::Event, &h, b"{}"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            t.remove(RecordClass::Event, &h),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            t.get(RecordClass::Event, &h),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_indices_follow_writes() {
        let mut t = tables();
        let h = Handle::from("p1");
        t.add(RecordClass::Person, &h, &person("I1", "Abbott")).unwrap();
        t.put(RecordClass::Person, &h, &person("I1", "Baker")).unwrap();

        let surnames = t.index(RecordClass::Person, IndexKind::Surname).unwrap();
        assert_eq!(surnames.keys(), vec!["Baker".to_string()]);

        t.remove(RecordClass::Person, &h).unwrap();
        assert!(t.index(RecordClass::Person, IndexKind::Surname).unwrap().is_empty());
        assert!(t.index(RecordClass::Person, IndexKind::GrampsId).unwrap().is_empty());
    }

    #[test]
    fn test_suspended_indexing_and_rebuild() {
        let mut t = tables();
        t.suspend_indexing(RecordClass::Person);
        t.add(RecordClass::Person, &Handle::from("a"), &person("I1", "Cole")).unwrap();
        assert!(t.index(RecordClass::Person, IndexKind::Surname).unwrap().is_empty());

        t.rebuild(RecordClass::Person).unwrap();
        assert!(!t.is_indexing_suspended(RecordClass::Person));
        assert_eq!(
            t.index(RecordClass::Person, IndexKind::Surname).unwrap().lookup("Cole"),
            vec![Handle::from("a")]
        );
    }

    #[test]
    fn test_indices_rebuilt_from_existing_backend() {
        let mut backend = MemoryBackend::new();
        backend.put("person", "p9", &person("I9", "Drake")).unwrap();
        let t = RecordTables::new(Box::new(backend)).unwrap();
        assert_eq!(
            t.index(RecordClass::Person, IndexKind::GrampsId).unwrap().lookup("I9"),
            vec![Handle::from("p9")]
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut t = tables();
        let empty = t.digest().unwrap();
        t.write(RecordClass::Note, &Handle::from("n"), Some(b"x")).unwrap();
        let one = t.digest().unwrap();
        assert_ne!(empty, one);
        t.write(RecordClass::Note, &Handle::from("n"), None).unwrap();
        assert_eq!(t.digest().unwrap(), empty);
    }
}
