// SPDX-License-Identifier: MIT

//! Operation contracts consumed by the coordinator
//!
//! Two cooperation styles share one external contract (start, cancel,
//! await-completion). The coordinator never inspects an operation beyond
//! its description and these primitives.

use crate::error::{AbortRefused, OperationError};
use crate::scope::CancelScope;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A unit of asynchronous work that observes cooperative cancellation.
#[async_trait]
pub trait CancellableOperation: Send + 'static {
    type Output: Send + 'static;

    /// Short human-readable description, used only for busy-state
    /// reporting.
    fn description(&self) -> String;

    /// Run the operation. Work must begin immediately. When `scope` is
    /// cancelled the operation must stop its own work promptly and return
    /// [`OperationError::Cancelled`] instead of a normal result.
    async fn run(self, scope: CancelScope) -> Result<Self::Output, OperationError>;
}

/// A unit of work that cannot observe a cancellation signal, for example a
/// call already blocked inside the debuggee, aborted by polling instead.
///
/// Runs through the states `WaitingToRun -> Running -> Aborting -> Aborted`;
/// `Aborted` is terminal and the coordinator guarantees the `Running ->
/// Aborting` transition happens at most once.
#[async_trait]
pub trait PolledOperation: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short human-readable description, used only for busy-state
    /// reporting.
    fn description(&self) -> String;

    /// Begin the work. Must return without blocking.
    fn start(&self);

    /// Ask the work to stop. Must return immediately. May be refused, in
    /// which case the abort driver retries.
    fn request_abort(&self) -> Result<(), AbortRefused>;

    /// Wait up to `timeout` for the work to finish. Returns whether it
    /// did. Concurrent waiters must be tolerated.
    async fn wait_completed(&self, timeout: Duration) -> bool;

    /// Called only while the coordinator is disposing. Must cause any
    /// in-progress `wait_completed` to return even if the work never truly
    /// finished, and must not panic.
    fn force_shutdown(&self);

    /// Take the result slot. Populated exactly once, after the work
    /// finished.
    fn take_output(&self) -> Option<Result<Self::Output, OperationError>>;
}

/// Object-safe abort surface of a polled operation, so the registry and
/// the abort driver stay non-generic.
#[async_trait]
pub(crate) trait PollControl: Send + Sync {
    fn request_abort(&self) -> Result<(), AbortRefused>;
    async fn wait_completed(&self, timeout: Duration) -> bool;
    fn force_shutdown(&self);
}

#[async_trait]
impl<O: PolledOperation> PollControl for O {
    fn request_abort(&self) -> Result<(), AbortRefused> {
        PolledOperation::request_abort(self)
    }

    async fn wait_completed(&self, timeout: Duration) -> bool {
        PolledOperation::wait_completed(self, timeout).await
    }

    fn force_shutdown(&self) {
        PolledOperation::force_shutdown(self)
    }
}

type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T, OperationError>> + Send>>;

/// A cooperative operation built from an async closure. See [`operation`].
pub struct FnOperation<T> {
    description: String,
    f: Box<dyn FnOnce(CancelScope) -> OperationFuture<T> + Send>,
}

/// Build a cooperative operation from a description and an async closure.
///
/// The closure receives the per-invocation [`CancelScope`] and must observe
/// it:
///
/// ```no_run
/// use evalcoord::{operation, OperationError};
///
/// let op = operation("evaluate watch expression", |scope| async move {
///     tokio::select! {
///         value = async { Ok(42) } => value,
///         _ = scope.cancelled() => Err(OperationError::Cancelled),
///     }
/// });
/// ```
pub fn operation<T, F, Fut>(description: impl Into<String>, f: F) -> FnOperation<T>
where
    T: Send + 'static,
    F: FnOnce(CancelScope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, OperationError>> + Send + 'static,
{
    FnOperation {
        description: description.into(),
        f: Box::new(move |scope| Box::pin(f(scope))),
    }
}

#[async_trait]
impl<T: Send + 'static> CancellableOperation for FnOperation<T> {
    type Output = T;

    fn description(&self) -> String {
        self.description.clone()
    }

    async fn run(self, scope: CancelScope) -> Result<T, OperationError> {
        (self.f)(scope).await
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
