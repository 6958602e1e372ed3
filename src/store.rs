//! Main Store struct tying all components together.

use crate::backend::{Backend, FileBackend, MemoryBackend};
use crate::error::{Result, StoreError};
use crate::handles::HandleGenerator;
use crate::records::RecordTables;
use crate::signals::SignalBus;
use crate::txn::{compute_signals, History, LogEntry, Signal, Transaction, TransactionOptions};
use crate::types::{Handle, Hash, IndexKind, RecordClass, StoreStats};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Schema version written into new stores.
pub const SCHEMA_VERSION: u32 = 1;

pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";

const ID_PREFIX_KEY: &str = "id_prefix";

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Store directory. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Reject transactions and settings changes.
    pub read_only: bool,

    /// Maximum number of undoable transactions kept.
    pub undo_limit: usize,

    /// Sync the file backend every N writes.
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            read_only: false,
            undo_limit: crate::txn::DEFAULT_UNDO_LIMIT,
            sync_interval: FileBackend::DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl StoreConfig {
    /// Configuration for a store directory.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

type HistoryCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// The record store.
///
/// Provides a unified interface for:
/// - Reading records and secondary-index lookups
/// - Grouping mutations into transactions
/// - Undoing and redoing committed transactions
/// - Publishing change signals on the store's [`SignalBus`]
///
/// Signals are emitted after every internal lock has been released, so
/// subscribers may read the store from inside their callbacks.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Primary data and secondary indices.
    tables: Mutex<RecordTables>,

    /// The open transaction, if any.
    active: Mutex<Option<Transaction>>,

    /// Undo/redo stacks.
    history: Mutex<History>,

    /// Change signals.
    bus: Arc<SignalBus>,

    handles: Mutex<HandleGenerator>,

    /// Next candidate number for `find_next_gramps_id`, per class.
    id_counters: Mutex<HashMap<RecordClass, u64>>,

    /// Id patterns overriding the class defaults.
    id_prefixes: RwLock<HashMap<RecordClass, String>>,

    undo_callback: RwLock<Option<HistoryCallback>>,
    redo_callback: RwLock<Option<HistoryCallback>>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        match &config.path {
            None => Self::with_backend(config, Box::new(MemoryBackend::new())),
            Some(path) if FileBackend::exists(path) => Self::open(config),
            Some(_) if config.create_if_missing => Self::create(config),
            Some(_) => Err(StoreError::NotInitialized),
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        let backend: Box<dyn Backend> = match &config.path {
            Some(path) => Box::new(FileBackend::create(path, config.sync_interval)?),
            None => Box::new(MemoryBackend::new()),
        };
        Self::with_backend(config, backend)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let path = config.path.as_ref().ok_or(StoreError::NotInitialized)?;
        let backend = FileBackend::open(path, config.sync_interval)?;
        Self::with_backend(config, Box::new(backend))
    }

    /// A fresh store that lives only in memory.
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(StoreConfig::default(), Box::new(MemoryBackend::new()))
    }

    /// Build a store over any backend.
    pub fn with_backend(config: StoreConfig, backend: Box<dyn Backend>) -> Result<Self> {
        let mut tables = RecordTables::new(backend)?;

        if tables.metadata(SCHEMA_VERSION_KEY)?.is_none() && !config.read_only {
            tables.set_metadata(SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string().as_bytes())?;
            tables.seal()?;
        }

        let mut id_prefixes = HashMap::new();
        for class in RecordClass::ALL {
            if let Some(bytes) = tables.metadata(&id_prefix_key(class))? {
                let pattern = String::from_utf8(bytes)
                    .map_err(|e| StoreError::Corruption(format!("id prefix for {}: {}", class, e)))?;
                id_prefixes.insert(class, pattern);
            }
        }

        info!(
            path = ?config.path,
            read_only = config.read_only,
            "opened store"
        );

        Ok(Self {
            history: Mutex::new(History::new(config.undo_limit)),
            config,
            tables: Mutex::new(tables),
            active: Mutex::new(None),
            bus: Arc::new(SignalBus::new()),
            handles: Mutex::new(HandleGenerator::default()),
            id_counters: Mutex::new(HashMap::new()),
            id_prefixes: RwLock::new(id_prefixes),
            undo_callback: RwLock::new(None),
            redo_callback: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// The bus this store publishes change signals on.
    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    // --- Transactions ---

    /// Open an undoable, non-batch transaction.
    pub fn begin(&self, description: impl Into<String>) -> Result<()> {
        self.begin_with(description, TransactionOptions::default())
    }

    /// Open a transaction. Only one may be open at a time.
    pub fn begin_with(
        &self,
        description: impl Into<String>,
        options: TransactionOptions,
    ) -> Result<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        let txn = Transaction::new(description, options);
        debug!(description = txn.description(), batch = options.batch, "begin transaction");
        *active = Some(txn);
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Commit the open transaction and publish its net effect.
    ///
    /// A non-empty `description` replaces the one given to `begin`. If the
    /// commit fails, the transaction stays open so it can be aborted.
    pub fn commit(&self, description: &str) -> Result<()> {
        let txn = {
            let mut active = self.active.lock();
            let txn = active.as_mut().ok_or(StoreError::NoActiveTransaction)?;
            if !description.is_empty() {
                txn.set_description(description);
            }

            let mut tables = self.tables.lock();
            if txn.is_batch() {
                for class in txn.touched_classes() {
                    tables.rebuild(class)?;
                }
            }
            tables.seal()?;
            active.take().ok_or(StoreError::NoActiveTransaction)?
        };

        if txn.is_empty() {
            debug!(description = txn.description(), "committed empty transaction");
            return Ok(());
        }

        let signals = compute_signals(txn.entries(), txn.is_batch());
        info!(
            description = txn.description(),
            entries = txn.len(),
            batch = txn.is_batch(),
            signals = signals.len(),
            "committed transaction"
        );

        {
            let mut history = self.history.lock();
            if txn.is_undoable() {
                history.record_commit(txn);
            } else {
                history.clear();
            }
        }

        self.emit(&signals);
        self.notify_history();
        Ok(())
    }

    /// Discard the open transaction, reverting every write it made.
    /// Nothing is published.
    ///
    /// If a revert fails, the writes already reverted are reapplied and the
    /// transaction stays open, so the abort can be retried.
    pub fn abort(&self) -> Result<()> {
        let mut active = self.active.lock();
        let txn = active.as_ref().ok_or(StoreError::NoActiveTransaction)?;

        let mut tables = self.tables.lock();
        let reverse: Vec<&LogEntry> = txn.entries().iter().rev().collect();
        apply_log(&mut tables, &reverse, Direction::Revert)?;
        for class in txn.touched_classes() {
            if tables.is_indexing_suspended(class) {
                tables.rebuild(class)?;
            }
        }

        debug!(description = txn.description(), entries = txn.len(), "aborted transaction");
        *active = None;
        Ok(())
    }

    /// Run `f` inside a transaction: commit if it returns `Ok`, abort and
    /// return the error otherwise.
    pub fn transaction<T, F>(&self, description: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T>,
    {
        self.transaction_with(description, TransactionOptions::default(), f)
    }

    pub fn transaction_with<T, F>(
        &self,
        description: &str,
        options: TransactionOptions,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T>,
    {
        self.begin_with(description, options)?;
        let outcome = f(self).and_then(|value| self.commit(description).map(|()| value));
        if outcome.is_err() && self.in_transaction() {
            if let Err(abort_err) = self.abort() {
                warn!(error = %abort_err, "failed to abort transaction");
            }
        }
        outcome
    }

    // --- Mutations ---

    /// Insert a record. Fails with `DuplicateHandle` if the handle exists.
    pub fn add_record(&self, class: RecordClass, handle: &Handle, payload: &[u8]) -> Result<()> {
        self.mutate(class, |tables, txn| {
            tables.add(class, handle, payload)?;
            txn.push(LogEntry::add(class, handle.clone(), payload.to_vec()));
            Ok(())
        })
    }

    /// Insert a record under a freshly generated handle.
    pub fn add_new_record(&self, class: RecordClass, payload: &[u8]) -> Result<Handle> {
        let handle = self.create_handle();
        self.add_record(class, &handle, payload)?;
        Ok(handle)
    }

    /// Replace a record. Fails with `NotFound` if absent.
    pub fn update_record(&self, class: RecordClass, handle: &Handle, payload: &[u8]) -> Result<()> {
        self.mutate(class, |tables, txn| {
            let old = tables.put(class, handle, payload)?;
            txn.push(LogEntry::update(class, handle.clone(), old, payload.to_vec()));
            Ok(())
        })
    }

    /// Delete a record. Fails with `NotFound` if absent.
    pub fn remove_record(&self, class: RecordClass, handle: &Handle) -> Result<()> {
        self.mutate(class, |tables, txn| {
            let old = tables.remove(class, handle)?;
            txn.push(LogEntry::delete(class, handle.clone(), old));
            Ok(())
        })
    }

    fn mutate<F>(&self, class: RecordClass, f: F) -> Result<()>
    where
        F: FnOnce(&mut RecordTables, &mut Transaction) -> Result<()>,
    {
        let mut active = self.active.lock();
        let txn = active.as_mut().ok_or(StoreError::NoActiveTransaction)?;
        let mut tables = self.tables.lock();
        let newly_suspended = txn.is_batch() && !tables.is_indexing_suspended(class);
        if newly_suspended {
            tables.suspend_indexing(class);
        }
        let result = f(&mut tables, txn);
        // Only logged classes get rebuilt at commit or abort.
        if result.is_err() && newly_suspended {
            tables.resume_indexing(class);
        }
        result
    }

    // --- Reads ---

    /// Fetch a record, failing with `NotFound` if absent.
    pub fn get(&self, class: RecordClass, handle: &Handle) -> Result<Vec<u8>> {
        self.tables.lock().get(class, handle)
    }

    pub fn try_get(&self, class: RecordClass, handle: &Handle) -> Result<Option<Vec<u8>>> {
        self.tables.lock().try_get(class, handle)
    }

    /// Fetch and decode a JSON record.
    pub fn get_json<T: DeserializeOwned>(&self, class: RecordClass, handle: &Handle) -> Result<T> {
        let payload = self.get(class, handle)?;
        serde_json::from_slice(&payload).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    pub fn has_handle(&self, class: RecordClass, handle: &Handle) -> Result<bool> {
        self.tables.lock().contains(class, handle)
    }

    pub fn count(&self, class: RecordClass) -> Result<usize> {
        self.tables.lock().count(class)
    }

    /// All handles of a class, sorted.
    pub fn handles(&self, class: RecordClass) -> Result<Vec<Handle>> {
        self.tables.lock().handles(class)
    }

    /// All (handle, payload) pairs of a class, sorted by handle.
    pub fn records(&self, class: RecordClass) -> Result<Vec<(Handle, Vec<u8>)>> {
        self.tables.lock().records(class)
    }

    // --- Secondary indices ---

    /// Handles whose `kind` key equals `key`. Empty if the class does not
    /// declare that index.
    ///
    /// Inside a batch transaction the indices of touched classes are stale
    /// until commit.
    pub fn find_by_index(&self, class: RecordClass, kind: IndexKind, key: &str) -> Vec<Handle> {
        self.tables
            .lock()
            .index(class, kind)
            .map(|index| index.lookup(key))
            .unwrap_or_default()
    }

    /// Distinct keys of one index, sorted (e.g. every surname).
    pub fn index_keys(&self, class: RecordClass, kind: IndexKind) -> Vec<String> {
        self.tables
            .lock()
            .index(class, kind)
            .map(|index| index.keys())
            .unwrap_or_default()
    }

    /// The record carrying a user-facing id.
    pub fn get_by_gramps_id(
        &self,
        class: RecordClass,
        gramps_id: &str,
    ) -> Result<Option<(Handle, Vec<u8>)>> {
        let tables = self.tables.lock();
        let Some(handle) = tables
            .index(class, IndexKind::GrampsId)
            .and_then(|index| index.lookup(gramps_id).into_iter().next())
        else {
            return Ok(None);
        };
        let payload = tables.get(class, &handle)?;
        Ok(Some((handle, payload)))
    }

    pub fn has_gramps_id(&self, class: RecordClass, gramps_id: &str) -> bool {
        self.tables
            .lock()
            .index(class, IndexKind::GrampsId)
            .is_some_and(|index| index.contains_key(gramps_id))
    }

    /// Recompute the indices of one class from primary data.
    pub fn rebuild_indices(&self, class: RecordClass) -> Result<()> {
        self.tables.lock().rebuild(class)
    }

    /// Recompute every index and tell subscribers to reload every class.
    pub fn request_rebuild(&self) -> Result<()> {
        {
            let mut tables = self.tables.lock();
            for class in RecordClass::ALL {
                tables.rebuild(class)?;
            }
        }
        let signals: Vec<Signal> = RecordClass::ALL.into_iter().map(Signal::rebuild).collect();
        self.emit(&signals);
        Ok(())
    }

    // --- User-facing ids ---

    /// The id pattern in effect for a class.
    pub fn id_prefix(&self, class: RecordClass) -> Option<String> {
        self.id_prefixes
            .read()
            .get(&class)
            .cloned()
            .or_else(|| class.default_id_prefix().map(str::to_string))
    }

    /// Set the id pattern of a class and persist it.
    ///
    /// A pattern with a `%d`/`%0Nd` specifier is kept, one without gets
    /// `%d` appended, and an empty or malformed one falls back to the class
    /// default.
    pub fn set_id_prefix(&self, class: RecordClass, pattern: &str) -> Result<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let pattern = validate_id_pattern(class, pattern).ok_or_else(|| {
            StoreError::InvalidFormat(format!("{} records carry no user-facing id", class))
        })?;
        {
            // An open transaction seals the setting along with its own writes.
            let active = self.active.lock();
            let mut tables = self.tables.lock();
            tables.set_metadata(&id_prefix_key(class), pattern.as_bytes())?;
            if active.is_none() {
                tables.seal()?;
            }
        }
        debug!(%class, pattern = %pattern, "set id prefix");
        self.id_prefixes.write().insert(class, pattern);
        self.id_counters.lock().remove(&class);
        Ok(())
    }

    /// The next unused user-facing id for a class, e.g. `I0007`.
    pub fn find_next_gramps_id(&self, class: RecordClass) -> Result<String> {
        let pattern = self.id_prefix(class).ok_or_else(|| {
            StoreError::InvalidFormat(format!("{} records carry no user-facing id", class))
        })?;
        let tables = self.tables.lock();
        let mut counters = self.id_counters.lock();
        let counter = counters.entry(class).or_insert(0);
        loop {
            let candidate = format_id(&pattern, *counter);
            *counter += 1;
            let taken = tables
                .index(class, IndexKind::GrampsId)
                .is_some_and(|index| index.contains_key(&candidate));
            if !taken {
                return Ok(candidate);
            }
        }
    }

    // --- Handles ---

    /// A new unique handle.
    pub fn create_handle(&self) -> Handle {
        self.handles.lock().next_handle()
    }

    /// Replace the handle generator (e.g. with a seeded one in tests).
    pub fn set_handle_generator(&self, generator: HandleGenerator) {
        *self.handles.lock() = generator;
    }

    // --- Undo / redo ---

    /// Revert the most recent committed transaction.
    ///
    /// Returns `false` if there is nothing to undo or a transaction is open.
    pub fn undo(&self) -> Result<bool> {
        if self.in_transaction() {
            debug!("undo refused while a transaction is open");
            return Ok(false);
        }
        let Some(txn) = self.history.lock().pop_undo() else {
            return Ok(false);
        };

        let applied = {
            let reverse: Vec<&LogEntry> = txn.entries().iter().rev().collect();
            apply_log(&mut self.tables.lock(), &reverse, Direction::Revert)
        };

        let signals = compute_signals(&txn.reversed_entries(), txn.is_batch());
        let description = txn.description().to_string();
        match applied {
            Ok(()) => self.history.lock().push_redo(txn),
            Err(e) => {
                self.history.lock().push_undo(txn);
                return Err(e);
            }
        }

        info!(description = %description, "undo");
        self.emit(&signals);
        self.notify_history();
        Ok(true)
    }

    /// Re-apply the most recently undone transaction.
    ///
    /// Returns `false` if there is nothing to redo or a transaction is open.
    pub fn redo(&self) -> Result<bool> {
        if self.in_transaction() {
            debug!("redo refused while a transaction is open");
            return Ok(false);
        }
        let Some(txn) = self.history.lock().pop_redo() else {
            return Ok(false);
        };

        let applied = {
            let forward: Vec<&LogEntry> = txn.entries().iter().collect();
            apply_log(&mut self.tables.lock(), &forward, Direction::Replay)
        };

        let signals = compute_signals(txn.entries(), txn.is_batch());
        let description = txn.description().to_string();
        match applied {
            Ok(()) => self.history.lock().push_undo(txn),
            Err(e) => {
                self.history.lock().push_redo(txn);
                return Err(e);
            }
        }

        info!(description = %description, "redo");
        self.emit(&signals);
        self.notify_history();
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().undo_count() > 0
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().redo_count() > 0
    }

    pub fn undo_description(&self) -> Option<String> {
        self.history.lock().next_undo().map(str::to_string)
    }

    pub fn redo_description(&self) -> Option<String> {
        self.history.lock().next_redo().map(str::to_string)
    }

    pub fn undo_count(&self) -> usize {
        self.history.lock().undo_count()
    }

    pub fn redo_count(&self) -> usize {
        self.history.lock().redo_count()
    }

    /// Forget all undo and redo history.
    pub fn clear_history(&self) {
        self.history.lock().clear();
        self.notify_history();
    }

    /// Called with `"Undo <description>"`, or `None` when nothing can be
    /// undone, after every commit, undo and redo.
    pub fn set_undo_callback<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        *self.undo_callback.write() = Some(Arc::new(callback));
    }

    /// Like [`set_undo_callback`](Self::set_undo_callback), with
    /// `"Redo <description>"`.
    pub fn set_redo_callback<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        *self.redo_callback.write() = Some(Arc::new(callback));
    }

    fn notify_history(&self) {
        let (undo_label, redo_label) = {
            let history = self.history.lock();
            (
                history.next_undo().map(|d| format!("Undo {}", d)),
                history.next_redo().map(|d| format!("Redo {}", d)),
            )
        };
        let undo_callback = self.undo_callback.read().clone();
        if let Some(callback) = undo_callback {
            callback(undo_label);
        }
        let redo_callback = self.redo_callback.read().clone();
        if let Some(callback) = redo_callback {
            callback(redo_label);
        }
    }

    fn emit(&self, signals: &[Signal]) {
        for signal in signals {
            self.bus.emit_signal(signal);
        }
    }

    // --- Whole-store ---

    /// Content digest over every record of every class.
    pub fn digest(&self) -> Result<Hash> {
        self.tables.lock().digest()
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        {
            let tables = self.tables.lock();
            for class in RecordClass::ALL {
                let records = tables.records(class)?;
                stats.total_records += records.len();
                stats.payload_bytes += records
                    .iter()
                    .map(|(_, payload)| payload.len() as u64)
                    .sum::<u64>();
                stats.record_counts.push((class, records.len()));
            }
        }
        let history = self.history.lock();
        stats.undo_depth = history.undo_count();
        stats.redo_depth = history.redo_count();
        Ok(stats)
    }

    /// Version recorded by the last schema upgrade.
    pub fn schema_version(&self) -> Result<u32> {
        match self.tables.lock().metadata(SCHEMA_VERSION_KEY)? {
            None => Ok(0),
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| StoreError::Corruption("unreadable schema version".into())),
        }
    }

    pub(crate) fn set_schema_version(&self, version: u32) -> Result<()> {
        self.tables
            .lock()
            .set_metadata(SCHEMA_VERSION_KEY, version.to_string().as_bytes())
    }

    /// Push buffered writes to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.tables.lock().flush()
    }

    /// Rewrite durable storage to hold only live records.
    pub fn compact(&self) -> Result<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let active = self.active.lock();
        if active.is_some() {
            return Err(StoreError::TransactionAlreadyOpen);
        }
        self.tables.lock().compact()?;
        info!(path = ?self.config.path, "compacted store");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            warn!("store closed with an open transaction, aborting it");
            if let Err(e) = self.abort() {
                warn!(error = %e, "failed to abort open transaction");
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    /// Write each entry's `old` payload.
    Revert,
    /// Write each entry's `new` payload.
    Replay,
}

fn payload(entry: &LogEntry, direction: Direction) -> Option<&[u8]> {
    match direction {
        Direction::Revert => entry.old.as_deref(),
        Direction::Replay => entry.new.as_deref(),
    }
}

/// Write `entries` in order and seal them. On failure the entries already
/// written are put back, newest first, so the tables end where they began.
fn apply_log(
    tables: &mut RecordTables,
    entries: &[&LogEntry],
    direction: Direction,
) -> Result<()> {
    let mut written = 0;
    let mut outcome = Ok(());
    for entry in entries {
        if let Err(e) = tables.write(entry.class, &entry.handle, payload(entry, direction)) {
            outcome = Err(e);
            break;
        }
        written += 1;
    }
    let outcome = outcome.and_then(|()| tables.seal());

    if outcome.is_err() {
        let back = match direction {
            Direction::Revert => Direction::Replay,
            Direction::Replay => Direction::Revert,
        };
        for entry in entries[..written].iter().rev() {
            if let Err(e) = tables.write(entry.class, &entry.handle, payload(entry, back)) {
                warn!(
                    class = %entry.class,
                    handle = %entry.handle,
                    error = %e,
                    "failed to restore record"
                );
            }
        }
    }
    outcome
}

fn id_prefix_key(class: RecordClass) -> String {
    format!("{}:{}", ID_PREFIX_KEY, class.name())
}

/// A parsed `%d` / `%0Nd` specifier.
struct IdPattern<'a> {
    head: &'a str,
    zero_pad: bool,
    width: usize,
    tail: &'a str,
}

fn parse_id_pattern(pattern: &str) -> Option<IdPattern<'_>> {
    let (head, rest) = pattern.split_once('%')?;
    let zero_pad = rest.starts_with('0');
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if !rest[digits_end..].starts_with('d') {
        return None;
    }
    let tail = &rest[digits_end + 1..];
    if tail.contains('%') {
        return None;
    }
    let width = if digits_end == 0 {
        0
    } else {
        rest[..digits_end].parse().ok()?
    };
    Some(IdPattern {
        head,
        zero_pad,
        width,
        tail,
    })
}

fn validate_id_pattern(class: RecordClass, pattern: &str) -> Option<String> {
    let default = class.default_id_prefix().map(str::to_string);
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return default;
    }
    if !pattern.contains('%') {
        // Tags have no default, so they get no id either way.
        return default.map(|_| format!("{}%d", pattern));
    }
    match parse_id_pattern(pattern) {
        Some(_) if default.is_some() => Some(pattern.to_string()),
        _ => default,
    }
}

fn format_id(pattern: &str, number: u64) -> String {
    match parse_id_pattern(pattern) {
        Some(p) if p.zero_pad => format!("{}{:0width$}{}", p.head, number, p.tail, width = p.width),
        Some(p) => format!("{}{:width$}{}", p.head, number, p.tail, width = p.width),
        None => format!("{}{}", pattern, number),
    }
}
