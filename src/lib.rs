//! # Kindred
//!
//! An embedded record store for genealogy data: transactional, undoable,
//! and observable.
//!
//! ## Core Concepts
//!
//! - **Records**: opaque payloads keyed by (class, handle), with derived
//!   secondary indices (user-facing id, surname, tag name)
//! - **Transactions**: flat groups of mutations, committed atomically and
//!   published as a minimal batch of signals
//! - **History**: undo/redo stacks of committed transactions
//! - **Signals**: `<class>-add`, `<class>-update`, `<class>-delete` and
//!   `<class>-rebuild`, dispatched synchronously on a [`SignalBus`]
//! - **Change notification**: a [`CallbackManager`] relays only the signals
//!   touching the handles a consumer tracks
//!
//! ## Example
//!
//! ```ignore
//! use kindred::{json_payload, RecordClass, SignalKey, Store};
//! use std::sync::Arc;
//!
//! let store = Store::in_memory()?;
//! store.bus().connect(SignalKey::add(RecordClass::Person), Arc::new(|handles| {
//!     println!("added {:?}", handles);
//! }));
//!
//! let handle = store.transaction("Add person", |s| {
//!     s.add_new_record(RecordClass::Person, &json_payload(&json!({
//!         "gramps_id": "I0001",
//!         "surname": "Garner",
//!     }))?)
//! })?;
//!
//! store.undo()?;
//! ```

pub mod backend;
pub mod error;
pub mod handles;
pub mod notifier;
pub mod records;
pub mod signals;
pub mod store;
pub mod txn;
pub mod types;
pub mod upgrade;

// Re-exports
pub use backend::{Backend, FileBackend, MemoryBackend};
pub use error::{Result, StoreError};
pub use handles::{Clock, FixedClock, HandleGenerator, SystemClock};
pub use notifier::{CallbackKey, CallbackManager, HandlerState};
pub use records::{RecordTables, SecondaryIndex};
pub use signals::{Callback, SignalBus, SignalReceiver, SubscriptionId};
pub use store::{Store, StoreConfig, SCHEMA_VERSION};
pub use txn::{compute_signals, LogEntry, Signal, Transaction, TransactionOptions};
pub use types::*;
pub use upgrade::UpgradeReport;
