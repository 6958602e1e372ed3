//! Undo/redo stacks of committed transactions.

use super::Transaction;
use std::collections::VecDeque;

/// Default cap on the undo stack.
pub const DEFAULT_UNDO_LIMIT: usize = 1000;

/// Committed transactions available for undo, and undone ones available
/// for redo.
#[derive(Debug)]
pub struct History {
    /// Oldest first.
    undo: VecDeque<Transaction>,
    /// Most recently undone last.
    redo: Vec<Transaction>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record a fresh commit. Redo history is discarded; the oldest entry
    /// falls off once the limit is reached.
    pub fn record_commit(&mut self, txn: Transaction) {
        self.redo.clear();
        self.push_undo(txn);
    }

    /// Take the most recent committed transaction.
    pub fn pop_undo(&mut self) -> Option<Transaction> {
        self.undo.pop_back()
    }

    /// Take the most recently undone transaction.
    pub fn pop_redo(&mut self) -> Option<Transaction> {
        self.redo.pop()
    }

    pub fn push_redo(&mut self, txn: Transaction) {
        self.redo.push(txn);
    }

    /// Return a redone transaction to the undo stack without touching redo.
    pub fn push_undo(&mut self, txn: Transaction) {
        if self.undo.len() >= self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(txn);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_count(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo.len()
    }

    /// Description of the transaction `undo` would revert.
    pub fn next_undo(&self) -> Option<&str> {
        self.undo.back().map(Transaction::description)
    }

    /// Description of the transaction `redo` would re-apply.
    pub fn next_redo(&self) -> Option<&str> {
        self.redo.last().map(Transaction::description)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_LIMIT)
    }
}
