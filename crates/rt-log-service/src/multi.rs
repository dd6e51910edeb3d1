// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fan-out wrapper over a primary and any number of secondary
//! [`LogStorage`] backends (spec §4.13, §9 "query from Postgres, archive
//! to S3").

use async_trait::async_trait;
use rt_cancel::Scope;
use rt_error::{ErrorKind, Result, RuntimeError};
use rt_log_storage::{LogEntry, LogQueryOptions, LogQueryResult, LogStorage, LogStorageStats};
use std::sync::Arc;
use uuid::Uuid;

/// Writes fan out to a primary backend and every secondary; reads and
/// deletes are served only by the primary, since it is the one expected
/// to support online queries (Postgres in the common configuration).
pub struct MultiLogService {
    primary: Arc<dyn LogStorage>,
    secondaries: Vec<Arc<dyn LogStorage>>,
}

impl MultiLogService {
    /// Build a fan-out service writing to `primary` and every backend in
    /// `secondaries`; queries and deletes are routed to `primary` alone.
    #[must_use]
    pub fn new(primary: Arc<dyn LogStorage>, secondaries: Vec<Arc<dyn LogStorage>>) -> Self {
        Self {
            primary,
            secondaries,
        }
    }
}

#[async_trait]
impl LogStorage for MultiLogService {
    fn name(&self) -> &'static str {
        "multi"
    }

    async fn write(&self, scope: &Scope, entries: Vec<LogEntry>) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.primary.write(scope, entries.clone()).await {
            errors.push(format!("{}: {err}", self.primary.name()));
        }
        for secondary in &self.secondaries {
            if let Err(err) = secondary.write(scope, entries.clone()).await {
                errors.push(format!("{}: {err}", secondary.name()));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::new(
                ErrorKind::TransportFailure,
                format!("log fan-out write failed on: {}", errors.join("; ")),
            ))
        }
    }

    async fn query(&self, scope: &Scope, opts: LogQueryOptions) -> Result<LogQueryResult> {
        self.primary.query(scope, opts).await
    }

    async fn get_execution_logs(
        &self,
        scope: &Scope,
        execution_id: Uuid,
        after_line: i32,
    ) -> Result<Vec<LogEntry>> {
        self.primary
            .get_execution_logs(scope, execution_id, after_line)
            .await
    }

    async fn delete(&self, scope: &Scope, opts: LogQueryOptions) -> Result<u64> {
        self.primary.delete(scope, opts).await
    }

    async fn stats(&self, scope: &Scope) -> Result<LogStorageStats> {
        self.primary.stats(scope).await
    }

    async fn health(&self, scope: &Scope) -> Result<()> {
        self.primary.health(scope).await?;
        for secondary in &self.secondaries {
            secondary.health(scope).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.primary.close().await {
            errors.push(format!("{}: {err}", self.primary.name()));
        }
        for secondary in &self.secondaries {
            if let Err(err) = secondary.close().await {
                errors.push(format!("{}: {err}", secondary.name()));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::new(
                ErrorKind::TransportFailure,
                format!("log fan-out close failed on: {}", errors.join("; ")),
            ))
        }
    }
}
