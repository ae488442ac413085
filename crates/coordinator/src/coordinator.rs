// SPDX-License-Identifier: MIT

//! The evaluation-operation coordinator
//!
//! Composes the cancellation scopes, the in-flight registry, and the busy
//! hub into the caller-facing surface: bounded invoke, abort-all, and
//! dispose. The coordinator is accessed by many caller tasks concurrently;
//! all blocking happens while waiting on an operation's completion signal
//! or the grace-window timers, never while holding the registry lock.

use crate::abort::{BeginAbort, PolledHandle};
use crate::busy::{BusyGuard, BusyHub, BusyReceiver, SubscriberId};
use crate::error::{CoordinatorError, InvokeError, OperationError};
use crate::operation::{CancellableOperation, PollControl, PolledOperation};
use crate::registry::{Completion, Registered, RegisteredKind, Registry};
use crate::scope::CancelScope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Timing and escalation policy. The defaults follow the debugger's
/// historical constants; tests override them through the builders.
#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    /// Grace window after cancelling before the busy state is raised.
    pub short_grace: Duration,
    /// Grace window while the busy state is raised, after which the caller
    /// is unblocked regardless of outcome.
    pub busy_grace: Duration,
    /// Poll interval for the abort retry loop before escalation.
    pub abort_poll_short: Duration,
    /// Poll interval for the abort retry loop after escalation.
    pub abort_poll_long: Duration,
    /// Unsuccessful short waits before the abort driver raises the busy
    /// state.
    pub busy_after_attempts: u32,
    /// Refused abort requests tolerated before the driver gives up.
    pub abort_retry_cap: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            short_grace: Duration::from_millis(100),
            busy_grace: Duration::from_millis(2000),
            abort_poll_short: Duration::from_millis(100),
            abort_poll_long: Duration::from_millis(500),
            busy_after_attempts: 6,
            abort_retry_cap: 20,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_short_grace(mut self, grace: Duration) -> Self {
        self.short_grace = grace;
        self
    }

    pub fn with_busy_grace(mut self, grace: Duration) -> Self {
        self.busy_grace = grace;
        self
    }

    pub fn with_abort_retry_cap(mut self, cap: u32) -> Self {
        self.abort_retry_cap = cap;
        self
    }
}

/// Runs evaluation operations under a hard wall-clock timeout, cancels
/// them when it expires, and escalates to the busy notification when
/// cancellation itself does not complete promptly.
///
/// Exactly one of natural completion, [`InvokeError::TimedOut`],
/// [`InvokeError::Aborted`], or [`InvokeError::Fault`] is reported per
/// invoke call.
pub struct Coordinator {
    registry: Arc<Registry>,
    busy: BusyHub,
    /// Cancelled once, when the coordinator disposes. Abort drivers switch
    /// to a forced shutdown when they observe it.
    disposing: CancelScope,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            busy: BusyHub::new(),
            disposing: CancelScope::new(),
            config,
        }
    }

    /// Subscribe to busy-state events. Delivery is best-effort and never
    /// required for correctness.
    pub fn subscribe_busy(&self) -> (SubscriberId, BusyReceiver) {
        self.busy.subscribe()
    }

    pub fn unsubscribe_busy(&self, id: &SubscriberId) {
        self.busy.unsubscribe(id);
    }

    pub fn busy_subscriber_count(&self) -> usize {
        self.busy.subscriber_count()
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Run a cooperative operation, waiting at most `timeout` for it to
    /// complete.
    ///
    /// On timeout the per-invocation scope is cancelled and the grace
    /// windows of the escalation protocol run; the caller is unblocked
    /// with [`InvokeError::TimedOut`] even if the operation has not yet
    /// actually stopped, in which case it stays registered and deregisters
    /// itself whenever it eventually finishes. If the scope was cancelled
    /// by a concurrent [`abort_all`](Self::abort_all) or
    /// [`dispose`](Self::dispose) instead, [`InvokeError::Aborted`] is
    /// reported so the caller can tell retryable from fatal.
    pub async fn invoke<O: CancellableOperation>(
        &self,
        op: O,
        timeout: Duration,
    ) -> Result<O::Output, InvokeError> {
        self.check_invoke_args(timeout)?;
        let description = op.description();
        let completion = Completion::new();
        let entry = self
            .registry
            .register(description, completion.clone(), RegisteredKind::Cooperative)
            .map_err(|_| InvokeError::Disposed)?;
        tracing::debug!(
            description = %entry.description,
            id = entry.id,
            timeout_ms = timeout.as_millis() as u64,
            "starting invoke"
        );

        let (result_tx, result_rx) = oneshot::channel();
        let registry = Arc::clone(&self.registry);
        let scope = entry.scope.clone();
        let id = entry.id;
        tokio::spawn(async move {
            let result = op.run(scope).await;
            // Deregister before the caller is unblocked.
            registry.remove(id);
            completion.signal();
            let _ = result_tx.send(result);
        });

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(OperationError::Failed(message)))) => {
                tracing::debug!(description = %entry.description, %message, "operation failed");
                Err(InvokeError::Fault(message))
            }
            Ok(Ok(Err(OperationError::Cancelled))) => {
                // Cancelled before this call's own timeout: a concurrent
                // abort-all or dispose won the race.
                Err(InvokeError::Aborted)
            }
            Ok(Err(_closed)) => {
                self.registry.remove(entry.id);
                entry.completion.signal();
                tracing::error!(description = %entry.description, "operation task terminated abnormally");
                Err(InvokeError::Fault(
                    "operation task terminated abnormally".to_string(),
                ))
            }
            Err(_elapsed) => {
                let was_aborted = entry.scope.is_cancelled();
                tracing::warn!(
                    description = %entry.description,
                    timeout_ms = timeout.as_millis() as u64,
                    "operation timed out, cancelling"
                );
                self.cancel_and_wait(&entry).await;
                if was_aborted {
                    Err(InvokeError::Aborted)
                } else {
                    Err(InvokeError::TimedOut)
                }
            }
        }
    }

    /// Run a poll-based operation, waiting at most `timeout` for it to
    /// complete. Same contract as [`invoke`](Self::invoke); on timeout the
    /// abort retry driver is started (or joined, if a concurrent abort is
    /// already driving) and the caller is unblocked once the grace windows
    /// elapse.
    pub async fn invoke_polled<O: PolledOperation>(
        &self,
        op: Arc<O>,
        timeout: Duration,
    ) -> Result<O::Output, InvokeError> {
        self.check_invoke_args(timeout)?;
        let description = op.description();
        let completion = Completion::new();
        let handle = Arc::new(PolledHandle::new(
            Arc::clone(&op) as Arc<dyn PollControl>,
            description.clone(),
            completion.clone(),
        ));
        let entry = self
            .registry
            .register(
                description,
                completion.clone(),
                RegisteredKind::Polled(Arc::clone(&handle)),
            )
            .map_err(|_| InvokeError::Disposed)?;
        tracing::debug!(
            description = %entry.description,
            id = entry.id,
            timeout_ms = timeout.as_millis() as u64,
            "starting polled invoke"
        );

        op.start();
        handle.mark_running();

        if self.disposing.is_cancelled() {
            // Dispose raced into the gap between registration and start:
            // its forced shutdown fired before the work existed. Deliver
            // it again now that it does.
            op.force_shutdown();
            return Err(InvokeError::Aborted);
        }

        if op.wait_completed(timeout).await {
            self.registry.remove(entry.id);
            entry.completion.signal();
            return match op.take_output() {
                Some(Ok(value)) => Ok(value),
                Some(Err(OperationError::Failed(message))) => {
                    tracing::debug!(description = %entry.description, %message, "operation failed");
                    Err(InvokeError::Fault(message))
                }
                Some(Err(OperationError::Cancelled)) => Err(InvokeError::Aborted),
                // Completion without a result: a forced shutdown released
                // the wait even though the work never truly finished.
                None if entry.scope.is_cancelled() => Err(InvokeError::Aborted),
                None => Err(InvokeError::Fault(
                    "operation completed without a result".to_string(),
                )),
            };
        }

        let was_aborted = entry.scope.is_cancelled();
        tracing::warn!(
            description = %entry.description,
            timeout_ms = timeout.as_millis() as u64,
            "polled operation timed out, aborting"
        );
        self.cancel_and_wait(&entry).await;
        if was_aborted {
            Err(InvokeError::Aborted)
        } else {
            Err(InvokeError::TimedOut)
        }
    }

    /// Cancel every currently outstanding operation while keeping the
    /// coordinator usable: the registry is snapshot-and-cleared and a fresh
    /// global scope installed atomically, so invokes issued afterwards are
    /// unaffected. Each drained operation then gets the same bounded
    /// grace-window escalation as a timed-out invoke, best-effort; one
    /// stuck operation cannot block reporting for the others.
    pub async fn abort_all(&self) -> Result<(), CoordinatorError> {
        let (batch, old_global) = self.registry.drain_for_abort()?;
        tracing::info!(operations = batch.len(), "aborting all in-flight operations");
        old_global.cancel();
        for entry in &batch {
            self.cancel_and_wait(entry).await;
        }
        Ok(())
    }

    /// Terminal shutdown. Sets the disposed flag (a second call fails with
    /// [`CoordinatorError::AlreadyDisposed`] and does not re-run teardown),
    /// cancels the global scope, and force-shuts-down every registered
    /// polled operation without blocking. Never hangs on a broken
    /// operation; teardown failures are logged and discarded.
    pub fn dispose(&self) -> Result<(), CoordinatorError> {
        let (batch, global) = self.registry.drain_for_dispose()?;
        tracing::info!(operations = batch.len(), "disposing coordinator");
        self.disposing.cancel();
        global.cancel();
        for entry in batch {
            match entry.kind {
                RegisteredKind::Cooperative => {
                    // Scope cancellation is all a cooperative operation
                    // gets; its own task deregisters it when it stops.
                }
                RegisteredKind::Polled(handle) => handle.force_shutdown_now(),
            }
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.registry.is_disposed()
    }

    fn check_invoke_args(&self, timeout: Duration) -> Result<(), InvokeError> {
        if timeout.is_zero() {
            return Err(InvokeError::InvalidTimeout);
        }
        if self.registry.is_disposed() {
            return Err(InvokeError::Disposed);
        }
        Ok(())
    }

    /// Shared escalation path for a cancelled operation (invoke timeout and
    /// abort-all). Cancels the per-invocation scope, then waits the grace
    /// windows for the completion signal, raising the busy state in
    /// between. The wait is bounded; the operation itself may keep running
    /// past it.
    async fn cancel_and_wait(&self, entry: &Registered) {
        entry.scope.cancel();
        match &entry.kind {
            RegisteredKind::Cooperative => {
                if entry.completion.wait(self.config.short_grace).await {
                    return;
                }
                let guard = BusyGuard::enter(&self.busy, &entry.description);
                let confirmed = entry.completion.wait(self.config.busy_grace).await;
                // Busy off regardless of outcome.
                drop(guard);
                if !confirmed {
                    tracing::warn!(
                        description = %entry.description,
                        "operation still running after grace windows, caller unblocked"
                    );
                }
            }
            RegisteredKind::Polled(handle) => {
                match handle.begin_abort() {
                    BeginAbort::Driver => {
                        tokio::spawn(Arc::clone(handle).drive_abort(
                            self.busy.clone(),
                            self.disposing.clone(),
                            Arc::clone(&self.registry),
                            entry.clone(),
                            self.config,
                        ));
                    }
                    BeginAbort::AlreadyAborting => {}
                    BeginAbort::AlreadyAborted => return,
                }
                // The driver emits its own busy pair and keeps retrying on
                // its own task; only the caller's wait is bounded here.
                let bounded = self.config.short_grace + self.config.busy_grace;
                let _ = entry.completion.wait(bounded).await;
            }
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
