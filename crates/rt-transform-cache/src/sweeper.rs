// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background TTL sweeper for the transform cache (spec §4.11 "periodically
//! purge expired entries"). Owned by a [`SweeperHandle`] for the same
//! reason `rt-storage-local`'s chunked-upload sweeper is: a deterministic,
//! cancellable shutdown instead of a leaked background loop.

use crate::cache::TransformCache;
use rt_cancel::Scope;
use rt_storage_core::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Owns the background TTL-cleanup task for a [`TransformCache`].
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
    scope: Scope,
}

impl SweeperHandle {
    /// Spawn a loop that calls [`TransformCache::cleanup`] every `interval`,
    /// scoped to `parent`.
    #[must_use]
    pub fn spawn<P>(cache: Arc<TransformCache<P>>, parent: &Scope, interval: Duration) -> Self
    where
        P: Provider + 'static,
    {
        let scope = parent.child();
        let task_scope = scope.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = task_scope.done() => {
                        tracing::debug!("transform-cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match cache.cleanup(&task_scope).await {
                            Ok(removed) if removed > 0 => {
                                tracing::info!(removed, "swept expired transform-cache entries");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "transform-cache sweep failed");
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
