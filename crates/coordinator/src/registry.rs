// SPDX-License-Identifier: MIT

//! In-flight operation registry
//!
//! All shared mutable state of the coordinator lives here behind a single
//! mutex: the in-flight map, the global cancellation scope pointer, and the
//! disposed flag. Critical sections are pure bookkeeping; nothing blocks
//! while holding the lock.

use crate::abort::PolledHandle;
use crate::error::CoordinatorError;
use crate::scope::CancelScope;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Identity of one in-flight invocation. Never reused within a registry.
pub(crate) type InvocationId = u64;

/// Idempotent one-way completion signal that tasks can wait on with a
/// timeout. Fired exactly once per operation, when it has signaled
/// completion to the coordinator.
#[derive(Clone)]
pub(crate) struct Completion {
    tx: Arc<watch::Sender<bool>>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait up to `timeout` for the signal. Returns whether it fired.
    pub(crate) async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        // The wait_for result borrows rx; resolve it before rx drops.
        let signalled = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        signalled
    }
}

/// Variant tag for a registered operation: which cancellation primitives
/// the coordinator drives.
#[derive(Clone)]
pub(crate) enum RegisteredKind {
    /// Cancelled through its scope; awaited through the completion signal.
    Cooperative,
    /// Aborted through the poll/retry driver on the handle.
    Polled(Arc<PolledHandle>),
}

/// One in-flight operation.
#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) id: InvocationId,
    pub(crate) description: String,
    /// Per-invocation scope, derived from the global scope at registration.
    pub(crate) scope: CancelScope,
    pub(crate) completion: Completion,
    pub(crate) kind: RegisteredKind,
}

struct RegistryInner {
    ops: HashMap<InvocationId, Registered>,
    global: CancelScope,
    disposed: bool,
    next_id: InvocationId,
}

/// The set of in-flight operations. An operation appears here iff it has
/// been started and has not yet signaled completion to the coordinator.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                ops: HashMap::new(),
                global: CancelScope::new(),
                disposed: false,
                next_id: 0,
            }),
        }
    }

    /// Register a new operation. The per-invocation scope is derived from
    /// the current global scope atomically with insertion, so a concurrent
    /// abort-all either sees the entry in its batch or leaves its scope
    /// attached to the fresh global.
    pub(crate) fn register(
        &self,
        description: String,
        completion: Completion,
        kind: RegisteredKind,
    ) -> Result<Registered, CoordinatorError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(CoordinatorError::Disposed);
        }
        inner.next_id += 1;
        let entry = Registered {
            id: inner.next_id,
            description,
            scope: inner.global.derive(),
            completion,
            kind,
        };
        inner.ops.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Remove an entry. Idempotent: removing an id that was already drained
    /// or removed is a no-op.
    pub(crate) fn remove(&self, id: InvocationId) -> Option<Registered> {
        self.lock().ops.remove(&id)
    }

    /// Put back an entry the caller drained but could not tear down, so it
    /// stays visible to `in_flight` and a later dispose. Refused once
    /// disposed; the caller falls back to a forced shutdown.
    pub(crate) fn restore(&self, entry: Registered) -> bool {
        let mut inner = self.lock();
        if inner.disposed {
            return false;
        }
        inner.ops.insert(entry.id, entry);
        true
    }

    pub(crate) fn contains(&self, id: InvocationId) -> bool {
        self.lock().ops.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().ops.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().ops.is_empty()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Snapshot-and-clear for abort-all: drains every entry and swaps in a
    /// fresh global scope so future registrations are unaffected. No
    /// operation can be both in the returned batch and newly added after
    /// the clear. Returns the drained entries and the old global scope,
    /// which the caller cancels outside the lock.
    pub(crate) fn drain_for_abort(
        &self,
    ) -> Result<(Vec<Registered>, CancelScope), CoordinatorError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(CoordinatorError::Disposed);
        }
        let batch = inner.ops.drain().map(|(_, entry)| entry).collect();
        let old = std::mem::replace(&mut inner.global, CancelScope::new());
        Ok((batch, old))
    }

    /// Terminal drain for dispose: sets the disposed flag so registration
    /// and abort-all fail fast afterwards. A second call fails without
    /// re-running teardown.
    pub(crate) fn drain_for_dispose(
        &self,
    ) -> Result<(Vec<Registered>, CancelScope), CoordinatorError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(CoordinatorError::AlreadyDisposed);
        }
        inner.disposed = true;
        let batch = inner.ops.drain().map(|(_, entry)| entry).collect();
        Ok((batch, inner.global.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
