//! Named-signal publish/subscribe.
//!
//! The bus knows nothing about transactions: it maps signal names
//! (`person-add`, `family-rebuild`, ...) to subscribers and dispatches
//! synchronously, in subscription order. Subscribers are either callbacks
//! or bounded channels for consumers that poll.
//!
//! # Example
//!
//! ```ignore
//! let bus = SignalBus::new();
//! let id = bus.connect(SignalKey::add(RecordClass::Person), Arc::new(|handles| {
//!     println!("added {:?}", handles);
//! }));
//! bus.emit(SignalKey::add(RecordClass::Person), &[Handle::from("abc")]);
//! bus.disconnect(id);
//! ```

mod bus;
mod types;

pub use bus::SignalBus;
pub use types::{Callback, SignalReceiver, SubscriptionId};
