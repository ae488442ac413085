// SPDX-License-Identifier: MIT

//! evalcoord: coordination of debugger evaluation operations
//!
//! Runs caller-supplied asynchronous operations under a hard wall-clock
//! timeout, cancels them cooperatively when the timeout expires, and
//! escalates to an external busy notification when cancellation itself does
//! not complete promptly. Evaluations run against an external, possibly
//! unresponsive debuggee; a stuck one must never hang the caller.
//!
//! This crate provides:
//! - Two operation contracts: [`CancellableOperation`] for work that can
//!   observe a cancellation signal, and [`PolledOperation`] for work already
//!   blocked where no signal can reach it
//! - [`CancelScope`] - hierarchical one-way cancellation
//! - [`Coordinator`] - bounded invoke, abort-all, and dispose with a
//!   busy-state escalation protocol

mod abort;
mod busy;
mod coordinator;
mod error;
mod operation;
mod registry;
mod scope;

pub use busy::{BusyReceiver, BusyStateEvent, SubscriberId};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::{AbortRefused, CoordinatorError, InvokeError, OperationError};
pub use operation::{operation, CancellableOperation, FnOperation, PolledOperation};
pub use scope::CancelScope;
