//! Subscription types for the signal bus.

use crate::txn::Signal;
use crate::types::Handle;
use std::sync::Arc;

/// Subscriber callback. Add/update/delete signals pass the ordered handle
/// list; rebuild signals pass an empty slice.
pub type Callback = Arc<dyn Fn(&[Handle]) + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a channel subscription.
pub struct SignalReceiver {
    pub id: SubscriptionId,
    /// Channel to receive signals.
    pub receiver: crossbeam_channel::Receiver<Signal>,
}

impl SignalReceiver {
    /// Receive the next signal (blocking).
    pub fn recv(&self) -> Result<Signal, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(&self) -> Result<Signal, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Signal, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<Signal> {
        self.receiver.try_iter().collect()
    }
}
