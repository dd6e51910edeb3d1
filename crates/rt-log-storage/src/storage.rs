// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `LogStorage` contract (spec §4.12): three interchangeable backends,
//! behavior-equivalent for `write`/`get_execution_logs`, differing in
//! `query` performance (Postgres is online; S3/local require a scan).

use crate::entry::{LogEntry, LogQueryOptions, LogQueryResult, LogStorageStats};
use async_trait::async_trait;
use rt_cancel::Scope;
use rt_error::Result;
use uuid::Uuid;

/// Uniform contract every log backend implements (spec §4.12).
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Short, stable backend name (`"postgres"`, `"s3"`, `"local"`).
    fn name(&self) -> &'static str;

    /// Persist a batch of entries. Entries missing `id`/`timestamp` are
    /// filled in before write. Returns on first failure — callers retry at
    /// the batch level (spec §7 "Write returns on first failure").
    async fn write(&self, scope: &Scope, entries: Vec<LogEntry>) -> Result<()>;

    /// Run a filtered, paginated query.
    async fn query(&self, scope: &Scope, opts: LogQueryOptions) -> Result<LogQueryResult>;

    /// Fetch every entry for one execution with `line_number > after_line`,
    /// in ascending line-number order.
    async fn get_execution_logs(
        &self,
        scope: &Scope,
        execution_id: Uuid,
        after_line: i32,
    ) -> Result<Vec<LogEntry>>;

    /// Delete entries matching `opts`, returning the count removed.
    /// Backends refuse an entirely unconstrained delete.
    async fn delete(&self, scope: &Scope, opts: LogQueryOptions) -> Result<u64>;

    /// Cheap diagnostic snapshot.
    async fn stats(&self, scope: &Scope) -> Result<LogStorageStats>;

    /// Liveness check: the backend can currently serve requests.
    async fn health(&self, scope: &Scope) -> Result<()>;

    /// Release any held resources (connection pools, background tasks).
    async fn close(&self) -> Result<()>;
}
