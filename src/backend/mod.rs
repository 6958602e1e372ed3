//! Pluggable key-value backends underneath the logical record tables.
//!
//! The record store keeps one table per record class plus a `metadata`
//! table. A backend only has to store opaque bytes under string keys; the
//! store maintains secondary indices and history above it.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::error::Result;

/// Table holding store-level settings (schema version, id prefixes).
pub const METADATA_TABLE: &str = "metadata";

/// Physical storage for the logical tables.
pub trait Backend: Send {
    /// Read a value.
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value.
    fn put(&mut self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&mut self, table: &str, key: &str) -> Result<()>;

    /// All entries of a table, ordered by key.
    fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Mark every write since the previous commit as one unit. Writes that
    /// were never committed are discarded when a durable backend reopens.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Push buffered writes to durable storage.
    fn flush(&mut self) -> Result<()>;

    /// Reclaim space held by superseded writes.
    fn compact(&mut self) -> Result<()> {
        Ok(())
    }
}
