//! Signal bus: synchronous dispatch of named signals.

use crate::error::Result;
use crate::txn::Signal;
use crate::types::{Handle, SignalKey};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{Callback, SignalReceiver, SubscriptionId};

/// Where a subscription delivers.
#[derive(Clone)]
enum Relay {
    Callback(Callback),
    Channel(Sender<Signal>),
}

/// Internal subscription state.
struct Subscription {
    id: SubscriptionId,
    key: SignalKey,
    relay: Relay,
}

/// Publish/subscribe hub for store signals.
pub struct SignalBus {
    /// Live subscriptions, in subscription order.
    subscriptions: RwLock<Vec<Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// When set, `emit` is a no-op.
    blocked: AtomicBool,
    /// Signals currently being dispatched.
    emitting: Mutex<HashSet<SignalKey>>,
}

/// Marks a signal as in flight for the duration of one dispatch.
struct EmitGuard<'a> {
    emitting: &'a Mutex<HashSet<SignalKey>>,
    key: SignalKey,
}

impl Drop for EmitGuard<'_> {
    fn drop(&mut self) {
        self.emitting.lock().remove(&self.key);
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            blocked: AtomicBool::new(false),
            emitting: Mutex::new(HashSet::new()),
        }
    }

    /// Subscribe a callback to a signal.
    pub fn connect(&self, key: SignalKey, callback: Callback) -> SubscriptionId {
        self.insert(key, Relay::Callback(callback))
    }

    /// Subscribe by signal name, e.g. `"person-update"`.
    ///
    /// Fails with `UnknownSignalKey` if the name does not denote a
    /// class/method pair.
    pub fn connect_named(&self, name: &str, callback: Callback) -> Result<SubscriptionId> {
        let key: SignalKey = name.parse()?;
        Ok(self.connect(key, callback))
    }

    /// Subscribe a bounded channel to a signal.
    ///
    /// If the buffer fills up the subscriber is dropped and its channel
    /// disconnects.
    pub fn subscribe_channel(&self, key: SignalKey, capacity: usize) -> SignalReceiver {
        let (sender, receiver) = bounded(capacity.max(1));
        let id = self.insert(key, Relay::Channel(sender));
        SignalReceiver { id, receiver }
    }

    fn insert(&self, key: SignalKey, relay: Relay) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().push(Subscription { id, key, relay });
        debug!(%key, id = id.0, "connected subscriber");
        id
    }

    /// Remove a subscription. Returns false if it was not connected.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        before != subs.len()
    }

    pub fn is_connected(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().iter().any(|sub| sub.id == id)
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Blocking ---

    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn unblock(&self) {
        self.blocked.store(false, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    // --- Emission ---

    /// Dispatch a signal to every current subscriber, in subscription order.
    ///
    /// No lock is held while callbacks run, so callbacks may read the store
    /// and connect or disconnect subscribers. A subscriber disconnected
    /// during dispatch is skipped for the rest of it. Emitting a signal from
    /// inside its own dispatch is dropped.
    pub fn emit(&self, key: SignalKey, handles: &[Handle]) {
        if self.is_blocked() {
            debug!(%key, "signal blocked");
            return;
        }

        if !self.emitting.lock().insert(key) {
            warn!(%key, "signal recursion blocked");
            return;
        }
        let _guard = EmitGuard {
            emitting: &self.emitting,
            key,
        };

        let targets: Vec<(SubscriptionId, Relay)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| sub.key == key)
            .map(|sub| (sub.id, sub.relay.clone()))
            .collect();

        debug!(%key, handles = handles.len(), subscribers = targets.len(), "emitting signal");

        let mut to_remove = Vec::new();
        for (id, relay) in targets {
            if !self.is_connected(id) {
                continue;
            }
            match relay {
                Relay::Callback(callback) => callback(handles),
                Relay::Channel(sender) => {
                    match sender.try_send(Signal::new(key, handles.to_vec())) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(%key, id = id.0, "dropping slow channel subscriber");
                            to_remove.push(id);
                        }
                        Err(TrySendError::Disconnected(_)) => to_remove.push(id),
                    }
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            self.subscriptions
                .write()
                .retain(|sub| !to_remove.contains(&sub.id));
        }
    }

    /// Dispatch a computed signal.
    pub fn emit_signal(&self, signal: &Signal) {
        self.emit(signal.key, &signal.handles);
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
