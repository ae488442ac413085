// SPDX-License-Identifier: MIT

//! Busy-state notifications for long-running cancellations
//!
//! When aborting an operation takes unusually long, the coordinator raises
//! a busy level signal so a user interface can tell the user why the
//! debugger is unresponsive. A `true` is always eventually followed by a
//! matching `false` for the same operation, which [`BusyGuard`] enforces on
//! every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Transient notification that cancelling an operation is taking unusually
/// long. Not retained and not queued by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyStateEvent {
    /// Description of the operation being cancelled.
    pub description: String,
    /// Level signal: raised when escalation starts, cleared when it ends.
    pub is_busy: bool,
}

/// Handle for unsubscribing from busy-state events.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiver for busy-state delivery.
pub type BusyReceiver = mpsc::UnboundedReceiver<BusyStateEvent>;
type BusySender = mpsc::UnboundedSender<BusyStateEvent>;

/// Publishes busy-state events to a set of subscribers.
///
/// Delivery is best-effort: a subscriber that went away is skipped and
/// logged, and can never break the escalation loop. Clones share the
/// subscriber set.
#[derive(Clone, Default)]
pub(crate) struct BusyHub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, BusySender>,
}

impl BusyHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribe to busy-state events. Returns a receiver and the id used
    /// to unsubscribe.
    pub(crate) fn subscribe(&self) -> (SubscriberId, BusyReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, tx);
        (SubscriberId(id), rx)
    }

    pub(crate) fn unsubscribe(&self, id: &SubscriberId) {
        self.lock().subscribers.remove(&id.0);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Publish an event to every subscriber, skipping closed receivers.
    pub(crate) fn publish(&self, event: BusyStateEvent) {
        let inner = self.lock();
        for (id, tx) in &inner.subscribers {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(subscriber = id, "busy subscriber went away");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped busy acquisition: publishes `{is_busy: true}` on enter and the
/// matching `{is_busy: false}` when dropped, on every exit path.
pub(crate) struct BusyGuard {
    hub: BusyHub,
    description: String,
}

impl BusyGuard {
    pub(crate) fn enter(hub: &BusyHub, description: &str) -> Self {
        hub.publish(BusyStateEvent {
            description: description.to_string(),
            is_busy: true,
        });
        Self {
            hub: hub.clone(),
            description: description.to_string(),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.hub.publish(BusyStateEvent {
            description: std::mem::take(&mut self.description),
            is_busy: false,
        });
    }
}

#[cfg(test)]
#[path = "busy_tests.rs"]
mod tests;
