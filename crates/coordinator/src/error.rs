// SPDX-License-Identifier: MIT

//! Error taxonomy for the coordinator boundary
//!
//! Only the variants of [`InvokeError`] ever reach an `invoke` caller.
//! Failures inside an individual operation's cancellation path (refused
//! abort requests, subscribers going away) are logged at the coordinator
//! boundary and never escalate past it.

use thiserror::Error;

/// Outcome surfaced to an `invoke` caller when the operation did not
/// produce a value. Exactly one of these (or the value) is reported per
/// invoke call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The requested timeout was zero.
    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    /// The coordinator has been disposed.
    #[error("coordinator is disposed")]
    Disposed,

    /// The timeout elapsed and cancellation could not be confirmed within
    /// the grace windows. The operation may still deregister itself later.
    #[error("evaluation timed out")]
    TimedOut,

    /// The operation was cancelled by a concurrent abort-all or dispose,
    /// not by this call's own timeout. Callers may retry.
    #[error("evaluation aborted")]
    Aborted,

    /// The operation ran to completion and failed on its own.
    #[error("evaluation failed: {0}")]
    Fault(String),
}

/// Errors from coordinator lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The coordinator has been disposed; abort-all is no longer accepted.
    #[error("coordinator is disposed")]
    Disposed,

    /// Dispose was called a second time. Teardown is not re-run.
    #[error("coordinator is already disposed")]
    AlreadyDisposed,
}

/// Failure reported by an operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The operation observed cancellation and stopped without a result.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed with its own error.
    #[error("{0}")]
    Failed(String),
}

/// A non-blocking abort request was refused. The abort driver retries
/// refused requests up to an internal cap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("abort request refused: {0}")]
pub struct AbortRefused(pub String);
