//! Error types for the record store.

use crate::types::{Handle, RecordClass};
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate handle: {class} {handle}")]
    DuplicateHandle { class: RecordClass, handle: Handle },

    #[error("Record not found: {class} {handle}")]
    NotFound { class: RecordClass, handle: Handle },

    #[error("A transaction is already open on this store")]
    TransactionAlreadyOpen,

    #[error("No transaction is open on this store")]
    NoActiveTransaction,

    #[error("Unknown signal key: {0}")]
    UnknownSignalKey(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    pub(crate) fn not_found(class: RecordClass, handle: &Handle) -> Self {
        StoreError::NotFound {
            class,
            handle: handle.clone(),
        }
    }

    /// A backend failure, with what the backend was doing.
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Storage(format!("{}: {}", context, err))
    }

    pub(crate) fn duplicate(class: RecordClass, handle: &Handle) -> Self {
        StoreError::DuplicateHandle {
            class,
            handle: handle.clone(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
