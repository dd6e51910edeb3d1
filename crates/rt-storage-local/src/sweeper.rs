// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background sweeper for expired chunked-upload sessions.
//!
//! Runs hourly and sweeps sessions past `expires_at` plus orphaned session
//! directories older than [`crate::chunked::ORPHAN_SWEEP_AGE_SECS`]
//! (spec §4.8 "Sweeper"). Owned by a [`SweeperHandle`] so callers can tear
//! the loop down deterministically instead of leaking a background task.

use crate::provider::LocalProvider;
use rt_cancel::Scope;
use rt_storage_core::ChunkedUpload;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Owns the background sweeper task.
///
/// Dropping this handle does not stop the task — call
/// [`SweeperHandle::shutdown`] for a clean stop, or let the owning
/// [`rt_cancel::CancelSignal`] fire.
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
    scope: Scope,
}

impl SweeperHandle {
    /// Spawn the hourly sweep loop against `provider`, scoped to `parent`.
    #[must_use]
    pub fn spawn(provider: Arc<LocalProvider>, parent: &Scope) -> Self {
        let scope = parent.child();
        let task_scope = scope.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    () = task_scope.done() => {
                        tracing::debug!("chunked-upload sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match provider.cleanup_expired_chunked_uploads(&task_scope).await {
                            Ok(removed) if removed > 0 => {
                                tracing::info!(removed, "swept expired chunked upload sessions");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "chunked-upload sweep failed");
                            }
                        }
                    }
                }
            }
        });
        Self { task, scope }
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        self.scope.cancel();
        let _ = self.task.await;
    }
}
