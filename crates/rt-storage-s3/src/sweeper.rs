// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background orphaned-multipart-upload sweeper, owned the same way
//! `rt-storage-local`'s chunked-upload sweeper and `rt-transform-cache`'s
//! TTL sweeper are: a [`SweeperHandle`] wraps the loop so shutdown is
//! deterministic instead of leaking a background task.

use crate::provider::sweep_orphaned_uploads;
use aws_sdk_s3::Client;
use rt_cancel::Scope;
use std::time::Duration;

const DEFAULT_ORPHAN_AGE: chrono::Duration = chrono::Duration::hours(24);

/// Owns the background orphaned-multipart-upload sweep task.
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
    scope: Scope,
}

impl SweeperHandle {
    /// Spawn a loop that sweeps multipart uploads older than
    /// `older_than` (default 24h) out of `bucket`, every `interval`.
    #[must_use]
    pub fn spawn(
        client: Client,
        bucket: String,
        parent: &Scope,
        interval: Duration,
        older_than: Option<chrono::Duration>,
    ) -> Self {
        let scope = parent.child();
        let task_scope = scope.clone();
        let older_than = older_than.unwrap_or(DEFAULT_ORPHAN_AGE);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    () = task_scope.done() => {
                        tracing::debug!("multipart-orphan sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match sweep_orphaned_uploads(&client, &bucket, older_than).await {
                            Ok(removed) if removed > 0 => {
                                tracing::info!(removed, bucket = %bucket, "swept orphaned multipart uploads");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, bucket = %bucket, "orphaned multipart sweep failed");
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
