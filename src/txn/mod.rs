//! Transactions, their net effect, and the undo/redo history.
//!
//! A [`Transaction`] is an ordered log of [`LogEntry`] pre/post images.
//! [`compute_signals`] collapses that log into the minimal, deterministic
//! batch of bus signals; [`History`] keeps committed transactions for undo
//! and redo.

mod history;
mod signals;
mod transaction;

pub use history::{History, DEFAULT_UNDO_LIMIT};
pub use signals::{compute_signals, Signal};
pub use transaction::{LogEntry, Transaction, TransactionOptions};
