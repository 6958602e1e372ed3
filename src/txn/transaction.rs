//! Transaction log types.

use crate::types::{Handle, RecordClass, SignalMethod};
use serde::{Deserialize, Serialize};

/// One mutation: the record's payload before and after.
///
/// `old == None` means the record did not exist before; `new == None` means
/// it does not exist after.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub class: RecordClass,
    pub handle: Handle,
    pub old: Option<Vec<u8>>,
    pub new: Option<Vec<u8>>,
}

impl LogEntry {
    pub fn add(class: RecordClass, handle: Handle, new: Vec<u8>) -> Self {
        Self {
            class,
            handle,
            old: None,
            new: Some(new),
        }
    }

    pub fn update(class: RecordClass, handle: Handle, old: Vec<u8>, new: Vec<u8>) -> Self {
        Self {
            class,
            handle,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(class: RecordClass, handle: Handle, old: Vec<u8>) -> Self {
        Self {
            class,
            handle,
            old: Some(old),
            new: None,
        }
    }

    /// The kind of mutation this entry records.
    pub fn method(&self) -> Option<SignalMethod> {
        match (&self.old, &self.new) {
            (None, Some(_)) => Some(SignalMethod::Add),
            (Some(_), Some(_)) => Some(SignalMethod::Update),
            (Some(_), None) => Some(SignalMethod::Delete),
            (None, None) => None,
        }
    }

    /// The entry that undoes this one.
    pub fn reversed(&self) -> Self {
        Self {
            class: self.class,
            handle: self.handle.clone(),
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}

/// Flags chosen when a transaction is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Trade per-record signals for one `<class>-rebuild` per touched class,
    /// and rebuild indices once at commit instead of per write.
    pub batch: bool,
    /// Whether the committed transaction goes onto the undo stack.
    pub undoable: bool,
}

impl TransactionOptions {
    /// Bulk mode: batch signalling, not undoable.
    pub fn batch() -> Self {
        Self {
            batch: true,
            undoable: false,
        }
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            batch: false,
            undoable: true,
        }
    }
}

/// An atomic group of mutations.
#[derive(Clone, Debug)]
pub struct Transaction {
    description: String,
    options: TransactionOptions,
    entries: Vec<LogEntry>,
}

impl Transaction {
    pub fn new(description: impl Into<String>, options: TransactionOptions) -> Self {
        Self {
            description: description.into(),
            options,
            entries: Vec::new(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    pub fn is_batch(&self) -> bool {
        self.options.batch
    }

    pub fn is_undoable(&self) -> bool {
        self.options.undoable
    }

    /// Entries in chronological order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The log as undo sees it: reverse order, old and new swapped.
    pub fn reversed_entries(&self) -> Vec<LogEntry> {
        self.entries.iter().rev().map(LogEntry::reversed).collect()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classes touched, in order of first touch.
    pub fn touched_classes(&self) -> Vec<RecordClass> {
        let mut classes = Vec::new();
        for entry in &self.entries {
            if !classes.contains(&entry.class) {
                classes.push(entry.class);
            }
        }
        classes
    }
}
