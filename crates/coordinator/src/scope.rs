// SPDX-License-Identifier: MIT

//! Hierarchical one-way cancellation scopes

use tokio_util::sync::CancellationToken;

/// A one-way cancellation signal with two states, live and cancelled.
///
/// Scopes form a hierarchy: cancelling a scope cancels every scope derived
/// from it, while cancelling a derived scope leaves its parent and siblings
/// untouched. A derived scope holds a reference to its parent at creation
/// time, so swapping out a "current" scope elsewhere never disturbs scopes
/// already derived. Clones share the same underlying signal.
#[derive(Clone, Debug, Default)]
pub struct CancelScope {
    token: CancellationToken,
}

impl CancelScope {
    /// A fresh, live scope.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a child scope. Deriving from an already-cancelled scope
    /// yields an already-cancelled child.
    pub fn derive(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancel this scope and everything derived from it. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the scope is cancelled. Completes immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
