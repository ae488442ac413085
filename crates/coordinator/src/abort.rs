// SPDX-License-Identifier: MIT

//! Abort driver for poll-based operations
//!
//! A polled operation cannot observe a cancellation signal, so aborting it
//! is a retry loop: request an abort, wait a short interval for completion,
//! repeat. If the loop runs long the busy state is raised; if the
//! coordinator disposes the loop switches to a forced shutdown. Exactly one
//! task ever drives the loop for a given operation.

use crate::busy::{BusyGuard, BusyHub};
use crate::coordinator::CoordinatorConfig;
use crate::operation::PollControl;
use crate::registry::{Completion, Registered, Registry};
use crate::scope::CancelScope;
use std::sync::{Arc, Mutex};

/// Abort lifecycle of a polled operation. `Aborted` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpState {
    WaitingToRun,
    Running,
    Aborting,
    Aborted,
}

/// How the abort driver ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AbortOutcome {
    /// Completion was confirmed within the retry loop.
    Confirmed,
    /// The coordinator was disposing; the operation was force-shut-down.
    ForcedShutdown,
    /// The retry cap was exhausted without confirming completion. The
    /// operation may still be running and stays registered.
    Incomplete,
}

/// What `begin_abort` observed.
pub(crate) enum BeginAbort {
    /// This caller won the `Running -> Aborting` transition and must spawn
    /// the driver.
    Driver,
    /// Another caller is already driving; wait on the completion signal.
    AlreadyAborting,
    /// Already terminal; nothing to wait for.
    AlreadyAborted,
}

struct Flags {
    state: OpState,
    outcome: Option<AbortOutcome>,
}

/// Per-operation abort state shared between the coordinator, the abort
/// driver task, and dispose.
pub(crate) struct PolledHandle {
    control: Arc<dyn PollControl>,
    description: String,
    completion: Completion,
    flags: Mutex<Flags>,
}

impl PolledHandle {
    pub(crate) fn new(
        control: Arc<dyn PollControl>,
        description: String,
        completion: Completion,
    ) -> Self {
        Self {
            control,
            description,
            completion,
            flags: Mutex::new(Flags {
                state: OpState::WaitingToRun,
                outcome: None,
            }),
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut flags = self.lock();
        if flags.state == OpState::WaitingToRun {
            flags.state = OpState::Running;
        }
    }

    pub(crate) fn state(&self) -> OpState {
        self.lock().state
    }

    pub(crate) fn outcome(&self) -> Option<AbortOutcome> {
        self.lock().outcome
    }

    /// Try to take ownership of the abort. Exactly one caller ever observes
    /// [`BeginAbort::Driver`]; a concurrent second abort sees `Aborting`
    /// and waits for completion instead of issuing a duplicate abort.
    pub(crate) fn begin_abort(&self) -> BeginAbort {
        let mut flags = self.lock();
        match flags.state {
            OpState::Aborted => BeginAbort::AlreadyAborted,
            OpState::Aborting => BeginAbort::AlreadyAborting,
            OpState::WaitingToRun | OpState::Running => {
                flags.state = OpState::Aborting;
                BeginAbort::Driver
            }
        }
    }

    /// Non-blocking forced shutdown, used while the coordinator disposes.
    /// Idempotent: a second call (for example from a racing driver) is a
    /// no-op.
    pub(crate) fn force_shutdown_now(&self) {
        {
            let mut flags = self.lock();
            if flags.state == OpState::Aborted {
                return;
            }
            flags.state = OpState::Aborted;
            if flags.outcome.is_none() {
                flags.outcome = Some(AbortOutcome::ForcedShutdown);
            }
        }
        self.control.force_shutdown();
        self.completion.signal();
    }

    /// The retry loop. Runs on its own spawned task so a caller that gives
    /// up waiting never abandons an abort in progress.
    ///
    /// Policy: request an abort, wait `abort_poll_short` for completion,
    /// repeat. After `busy_after_attempts` unsuccessful short waits the busy
    /// state is raised and the interval grows to `abort_poll_long`. Refused
    /// abort requests are transient and retried up to `abort_retry_cap`,
    /// after which the loop gives up and leaves the operation registered.
    pub(crate) async fn drive_abort(
        self: Arc<Self>,
        busy: BusyHub,
        disposing: CancelScope,
        registry: Arc<Registry>,
        entry: Registered,
        config: CoordinatorConfig,
    ) {
        let mut short_waits = 0u32;
        let mut refused = 0u32;
        let mut poll = config.abort_poll_short;
        let mut abort_requested = false;
        let mut busy_guard: Option<BusyGuard> = None;

        let outcome = loop {
            if disposing.is_cancelled() {
                break AbortOutcome::ForcedShutdown;
            }
            if !abort_requested {
                match self.control.request_abort() {
                    Ok(()) => abort_requested = true,
                    Err(error) => {
                        refused += 1;
                        tracing::warn!(
                            description = %self.description,
                            %error,
                            attempt = refused,
                            "abort request refused, retrying"
                        );
                        if refused > config.abort_retry_cap {
                            break AbortOutcome::Incomplete;
                        }
                    }
                }
            }
            if self.control.wait_completed(poll).await {
                break AbortOutcome::Confirmed;
            }
            short_waits += 1;
            if short_waits == config.busy_after_attempts && busy_guard.is_none() {
                tracing::info!(
                    description = %self.description,
                    "abort not confirmed after repeated attempts, entering busy state"
                );
                busy_guard = Some(BusyGuard::enter(&busy, &self.description));
                poll = config.abort_poll_long;
            }
        };

        // Emits the matching busy=false if the busy state was raised, on
        // every exit path.
        drop(busy_guard);

        match outcome {
            AbortOutcome::Confirmed => {
                tracing::debug!(description = %self.description, "abort confirmed");
                self.finish(AbortOutcome::Confirmed);
                registry.remove(entry.id);
                self.completion.signal();
            }
            AbortOutcome::ForcedShutdown => {
                tracing::debug!(description = %self.description, "forced shutdown while disposing");
                self.force_shutdown_now();
                registry.remove(entry.id);
            }
            AbortOutcome::Incomplete => {
                // Known escape hatch: the operation never confirmed
                // cancellation. Keep it tracked so a later dispose can
                // still force-shut it down; an abort-all has already
                // drained it, so put it back. Do not signal completion for
                // work that may still be running.
                tracing::error!(
                    description = %self.description,
                    "abort retries exhausted without confirming completion, giving up"
                );
                self.lock().outcome = Some(AbortOutcome::Incomplete);
                if !registry.restore(entry) {
                    self.force_shutdown_now();
                }
            }
        }
    }

    fn finish(&self, outcome: AbortOutcome) {
        let mut flags = self.lock();
        flags.state = OpState::Aborted;
        if flags.outcome.is_none() {
            flags.outcome = Some(outcome);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
impl PolledHandle {
    pub(crate) fn set_state_for_test(&self, state: OpState) {
        self.lock().state = state;
    }
}

#[cfg(test)]
#[path = "abort_tests.rs"]
mod tests;
