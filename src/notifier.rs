//! Selective change notification.
//!
//! A [`CallbackManager`] sits between the store's signal bus and one
//! consumer. The consumer names the handles it cares about and the
//! callbacks it wants; the manager subscribes relays that filter every bus
//! payload down to the tracked handles before calling back.

use crate::error::{Result, StoreError};
use crate::signals::{Callback, SignalBus, SubscriptionId};
use crate::store::Store;
use crate::types::{Handle, RecordClass, SignalKey, SignalMethod};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Target of a callback registration: every method of a class, or one
/// (class, method) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKey {
    Class(RecordClass),
    Signal(SignalKey),
}

impl CallbackKey {
    /// The signal keys this registration covers.
    pub fn signal_keys(self) -> Vec<SignalKey> {
        match self {
            CallbackKey::Class(class) => SignalMethod::ALL
                .into_iter()
                .map(|method| SignalKey::new(class, method))
                .collect(),
            CallbackKey::Signal(key) => vec![key],
        }
    }
}

impl From<RecordClass> for CallbackKey {
    fn from(class: RecordClass) -> Self {
        CallbackKey::Class(class)
    }
}

impl From<SignalKey> for CallbackKey {
    fn from(key: SignalKey) -> Self {
        CallbackKey::Signal(key)
    }
}

impl FromStr for CallbackKey {
    type Err = StoreError;

    /// Accepts `"person"` or `"person-update"`.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(key) = s.parse::<SignalKey>() {
            return Ok(CallbackKey::Signal(key));
        }
        s.parse::<RecordClass>()
            .map(CallbackKey::Class)
            .map_err(|_| StoreError::UnknownSignalKey(s.to_string()))
    }
}

/// Lifecycle of one (class, method) handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    /// No callback.
    Unbound,
    /// Callback stored, no live subscription.
    Registered,
    /// Callback stored and relayed from the bus.
    Connected,
}

struct Handler {
    callback: Callback,
    subscription: Option<SubscriptionId>,
}

type TrackedSet = Arc<RwLock<HashMap<RecordClass, HashSet<Handle>>>>;

/// Relays bus signals for a chosen subset of records to a consumer.
///
/// Holds only a weak reference to the bus. Dropping the manager
/// disconnects everything it subscribed.
pub struct CallbackManager {
    bus: Weak<SignalBus>,
    tracked: TrackedSet,
    handlers: Mutex<HashMap<SignalKey, Handler>>,
    /// Subscriptions made through `add_db_signal`.
    custom: Mutex<Vec<SubscriptionId>>,
}

impl CallbackManager {
    /// Bind to a store's signal bus.
    pub fn new(store: &Store) -> Self {
        Self::with_bus(store.bus())
    }

    pub fn with_bus(bus: &Arc<SignalBus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            tracked: Arc::new(RwLock::new(HashMap::new())),
            handlers: Mutex::new(HashMap::new()),
            custom: Mutex::new(Vec::new()),
        }
    }

    // --- Tracked handles ---

    /// Add handles to the tracked sets.
    pub fn register_handles<I, H>(&self, mapping: I)
    where
        I: IntoIterator<Item = (RecordClass, H)>,
        H: IntoIterator<Item = Handle>,
    {
        let mut tracked = self.tracked.write();
        for (class, handles) in mapping {
            tracked.entry(class).or_default().extend(handles);
        }
    }

    /// Remove handles from the tracked sets. Handles that are not tracked
    /// are ignored.
    pub fn unregister_handles<I, H>(&self, mapping: I)
    where
        I: IntoIterator<Item = (RecordClass, H)>,
        H: IntoIterator<Item = Handle>,
    {
        let mut tracked = self.tracked.write();
        for (class, handles) in mapping {
            let set = tracked.entry(class).or_default();
            for handle in handles {
                if !set.remove(&handle) {
                    debug!(%class, %handle, "unregistering untracked handle");
                }
            }
        }
    }

    /// Forget every tracked handle.
    pub fn unregister_all(&self) {
        self.tracked.write().clear();
    }

    /// Tracked handles of a class, sorted.
    pub fn tracked(&self, class: RecordClass) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self
            .tracked
            .read()
            .get(&class)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    pub fn is_tracked(&self, class: RecordClass, handle: &Handle) -> bool {
        self.tracked
            .read()
            .get(&class)
            .is_some_and(|set| set.contains(handle))
    }

    // --- Callbacks ---

    /// Store callbacks. A callback replacing a connected one unsubscribes
    /// the old relay first; the key is left registered but not connected.
    pub fn register_callbacks<I>(&self, mapping: I)
    where
        I: IntoIterator<Item = (CallbackKey, Callback)>,
    {
        let bus = self.bus.upgrade();
        let mut handlers = self.handlers.lock();
        for (target, callback) in mapping {
            for key in target.signal_keys() {
                let previous = handlers.insert(
                    key,
                    Handler {
                        callback: Arc::clone(&callback),
                        subscription: None,
                    },
                );
                if let (Some(id), Some(bus)) =
                    (previous.and_then(|handler| handler.subscription), &bus)
                {
                    bus.disconnect(id);
                }
            }
        }
    }

    /// Store one callback by name (`"person"` or `"person-add"`).
    pub fn register_named(&self, name: &str, callback: Callback) -> Result<()> {
        let key: CallbackKey = name.parse()?;
        self.register_callbacks([(key, callback)]);
        Ok(())
    }

    /// Subscribe relays for every registered method of `classes`.
    ///
    /// An existing subscription for the same key is replaced. Keys without a
    /// registered callback stay unbound.
    pub fn connect_all(&self, classes: &[RecordClass]) -> Result<()> {
        let bus = self.bus.upgrade().ok_or(StoreError::NotInitialized)?;
        let mut handlers = self.handlers.lock();
        for &class in classes {
            for method in SignalMethod::ALL {
                let key = SignalKey::new(class, method);
                let Some(handler) = handlers.get_mut(&key) else {
                    continue;
                };
                if let Some(id) = handler.subscription.take() {
                    bus.disconnect(id);
                }
                let relay = self.relay(key, Arc::clone(&handler.callback));
                handler.subscription = Some(bus.connect(key, relay));
            }
        }
        debug!(classes = classes.len(), "connected change notifier");
        Ok(())
    }

    fn relay(&self, key: SignalKey, callback: Callback) -> Callback {
        let tracked = Arc::clone(&self.tracked);
        let class = key.class;
        if key.method == SignalMethod::Rebuild {
            return Arc::new(move |_: &[Handle]| {
                let interested = tracked
                    .read()
                    .get(&class)
                    .is_some_and(|set| !set.is_empty());
                if interested {
                    let empty: &[Handle] = &[];
                    callback(empty);
                }
            });
        }
        Arc::new(move |handles: &[Handle]| {
            let matching: Vec<Handle> = {
                let tracked = tracked.read();
                match tracked.get(&class) {
                    Some(set) => handles
                        .iter()
                        .filter(|handle| set.contains(*handle))
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                }
            };
            if !matching.is_empty() {
                callback(&matching);
            }
        })
    }

    /// Subscribe an unfiltered callback directly on the bus. Released by
    /// [`disconnect_all`](Self::disconnect_all).
    pub fn add_db_signal(&self, name: &str, callback: Callback) -> Result<SubscriptionId> {
        let bus = self.bus.upgrade().ok_or(StoreError::NotInitialized)?;
        let id = bus.connect_named(name, callback)?;
        self.custom.lock().push(id);
        Ok(id)
    }

    /// Drop every subscription and every stored callback. Safe to call
    /// repeatedly.
    pub fn disconnect_all(&self) {
        let handlers = std::mem::take(&mut *self.handlers.lock());
        let custom = std::mem::take(&mut *self.custom.lock());
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut released = 0;
        for id in handlers
            .into_values()
            .filter_map(|handler| handler.subscription)
            .chain(custom)
        {
            if bus.disconnect(id) {
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, "disconnected change notifier");
        }
    }

    pub fn handler_state(&self, key: SignalKey) -> HandlerState {
        match self.handlers.lock().get(&key) {
            None => HandlerState::Unbound,
            Some(Handler {
                subscription: None,
                ..
            }) => HandlerState::Registered,
            Some(_) => HandlerState::Connected,
        }
    }
}

impl Drop for CallbackManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<Vec<Handle>>>>, Callback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback =
            Arc::new(move |handles: &[Handle]| sink.lock().push(handles.to_vec()));
        (seen, callback)
    }

    fn h(s: &str) -> Handle {
        Handle::from(s)
    }

    #[test]
    fn test_callback_key_parsing() {
        assert_eq!(
            "person".parse::<CallbackKey>().unwrap(),
            CallbackKey::Class(RecordClass::Person)
        );
        assert_eq!(
            "note-rebuild".parse::<CallbackKey>().unwrap(),
            CallbackKey::Signal(SignalKey::rebuild(RecordClass::Note))
        );
        assert!(matches!(
            "people-add".parse::<CallbackKey>(),
            Err(StoreError::UnknownSignalKey(_))
        ));
        assert_eq!(CallbackKey::Class(RecordClass::Tag).signal_keys().len(), 4);
    }

    #[test]
    fn test_relay_filters_to_tracked() {
        let bus = Arc::new(SignalBus::new());
        let manager = CallbackManager::with_bus(&bus);
        let (seen, callback) = recorder();

        manager.register_handles([(RecordClass::Person, vec![h("a"), h("c")])]);
        manager.register_callbacks([(CallbackKey::Class(RecordClass::Person), callback)]);
        manager.connect_all(&[RecordClass::Person]).unwrap();

        bus.emit(SignalKey::update(RecordClass::Person), &[h("c"), h("b"), h("a")]);
        bus.emit(SignalKey::update(RecordClass::Person), &[h("b")]);
        bus.emit(SignalKey::update(RecordClass::Family), &[h("a")]);

        assert_eq!(*seen.lock(), vec![vec![h("c"), h("a")]]);
    }

    #[test]
    fn test_rebuild_relay_requires_tracked_handles() {
        let bus = Arc::new(SignalBus::new());
        let manager = CallbackManager::with_bus(&bus);
        let (seen, callback) = recorder();
        manager.register_named("event-rebuild", callback).unwrap();
        manager.connect_all(&[RecordClass::Event]).unwrap();

        bus.emit(SignalKey::rebuild(RecordClass::Event), &[]);
        assert!(seen.lock().is_empty());

        manager.register_handles([(RecordClass::Event, vec![h("e")])]);
        bus.emit(SignalKey::rebuild(RecordClass::Event), &[]);
        assert_eq!(*seen.lock(), vec![Vec::<Handle>::new()]);
    }

    #[test]
    fn test_handler_state_machine() {
        let bus = Arc::new(SignalBus::new());
        let manager = CallbackManager::with_bus(&bus);
        let key = SignalKey::add(RecordClass::Family);
        let (_, callback) = recorder();

        assert_eq!(manager.handler_state(key), HandlerState::Unbound);
        manager.register_callbacks([(CallbackKey::Signal(key), Arc::clone(&callback))]);
        assert_eq!(manager.handler_state(key), HandlerState::Registered);
        manager.connect_all(&[RecordClass::Family]).unwrap();
        assert_eq!(manager.handler_state(key), HandlerState::Connected);
        assert_eq!(bus.subscription_count(), 1);

        // Re-registering drops the live relay.
        manager.register_callbacks([(CallbackKey::Signal(key), callback)]);
        assert_eq!(manager.handler_state(key), HandlerState::Registered);
        assert_eq!(bus.subscription_count(), 0);

        manager.connect_all(&[RecordClass::Family]).unwrap();
        manager.connect_all(&[RecordClass::Family]).unwrap();
        assert_eq!(bus.subscription_count(), 1);

        manager.disconnect_all();
        manager.disconnect_all();
        assert_eq!(manager.handler_state(key), HandlerState::Unbound);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_unregister_handles() {
        let bus = Arc::new(SignalBus::new());
        let manager = CallbackManager::with_bus(&bus);
        manager.register_handles([(RecordClass::Note, vec![h("n1"), h("n2")])]);
        manager.unregister_handles([(RecordClass::Note, vec![h("n1"), h("never")])]);
        assert_eq!(manager.tracked(RecordClass::Note), vec![h("n2")]);
        assert!(!manager.is_tracked(RecordClass::Note, &h("n1")));

        manager.unregister_all();
        assert!(manager.tracked(RecordClass::Note).is_empty());
    }

    #[test]
    fn test_db_signals_released_on_drop() {
        let bus = Arc::new(SignalBus::new());
        {
            let manager = CallbackManager::with_bus(&bus);
            let (_, callback) = recorder();
            manager.add_db_signal("tag-add", callback).unwrap();
            assert_eq!(bus.subscription_count(), 1);
        }
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_dead_bus() {
        let bus = Arc::new(SignalBus::new());
        let manager = CallbackManager::with_bus(&bus);
        drop(bus);
        assert!(matches!(
            manager.connect_all(&[RecordClass::Person]),
            Err(StoreError::NotInitialized)
        ));
        manager.disconnect_all();
    }
}
