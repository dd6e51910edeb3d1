// SPDX-License-Identifier: MIT OR Apache-2.0
//! Single-shot, concurrency-safe cancellation (spec C1).
//!
//! [`CancelSignal`] is a one-shot latch with two states, `active` and
//! `cancelled`; the only legal transition is `active -> cancelled`, and
//! repeated [`CancelSignal::cancel`] calls are idempotent. [`CancelSignal::scope`]
//! returns a [`Scope`] — a cancellation-scoped value derived from a root
//! with no parent — and child operations derive further scopes from it
//! via [`Scope::child`]. Cancelling the root signal marks every descendant
//! scope done.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use tokio_util::sync::CancellationToken;

/// A one-shot cancellation latch.
///
/// Cloning a `CancelSignal` shares the same underlying state: cancelling
/// any clone cancels all of them.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    root: CancellationToken,
}

impl CancelSignal {
    /// Create a new signal in the `active` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Transition to `cancelled`. Idempotent and safe under any concurrency.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// `true` once [`cancel`](Self::cancel) has been called; stays `true` forever after.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Returns the root [`Scope`] — a cancellation-scoped value derived
    /// from a root of no parent.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope {
            token: self.root.clone(),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A cancellation-scoped value. Subordinate operations derive child scopes
/// from this one; cancelling any ancestor marks every descendant done.
#[derive(Clone, Debug)]
pub struct Scope {
    token: CancellationToken,
}

impl Scope {
    /// Derive a child scope. The child becomes done when either it or any
    /// ancestor is cancelled, but cancelling a child never cancels its parent.
    #[must_use]
    pub fn child(&self) -> Scope {
        Scope {
            token: self.token.child_token(),
        }
    }

    /// `true` if this scope (or an ancestor) has been cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel this scope. Only affects this scope and its descendants,
    /// never an ancestor.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once this scope (or an ancestor) is cancelled.
    pub async fn done(&self) {
        self.token.cancelled().await;
    }

    /// Access the underlying [`tokio_util::sync::CancellationToken`] for
    /// integration with `tokio::select!` or other cancellation-aware APIs.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_active() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(!signal.scope().is_done());
    }

    #[test]
    fn cancel_is_permanent() {
        let signal = CancelSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_under_repeated_calls() {
        let signal = CancelSignal::new();
        for _ in 0..50 {
            signal.cancel();
        }
        assert!(signal.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = CancelSignal::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn child_scope_done_when_parent_cancelled() {
        let signal = CancelSignal::new();
        let root = signal.scope();
        let child = root.child();
        let grandchild = child.child();
        assert!(!child.is_done());
        signal.cancel();
        assert!(child.is_done());
        assert!(grandchild.is_done());
    }

    #[test]
    fn cancelling_child_does_not_cancel_parent() {
        let signal = CancelSignal::new();
        let root = signal.scope();
        let child = root.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!root.is_done());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn done_future_resolves_on_cancel() {
        let signal = CancelSignal::new();
        let scope = signal.scope();
        let task = tokio::spawn(async move {
            scope.done().await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scope.done() should resolve promptly after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_cancels_are_safe() {
        let signal = CancelSignal::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let s = signal.clone();
            handles.push(tokio::spawn(async move { s.cancel() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(signal.is_cancelled());
    }
}
