//! Per-class record tables with derived secondary indices.
//!
//! Primary data lives in a pluggable [`Backend`](crate::backend::Backend);
//! secondary indices are in-memory derived state, rebuilt from primary data
//! on open and maintained incrementally on every write.

mod index;
mod tables;

pub use index::SecondaryIndex;
pub use tables::RecordTables;
