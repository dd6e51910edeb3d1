// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3-compatible NDJSON-chunk [`LogStorage`] backend (spec §4.12, §6
//! on-disk layout), built generically over any [`Provider`] the same way
//! [`rt_transform_cache::TransformCache`] decorates a provider rather than
//! hardcoding S3.
//!
//! Key scheme: `<prefix>/<category>/YYYY/MM/DD/{exec_<id>_<nanos>.ndjson |
//! batch_<rand8>.ndjson}`. Object storage has no append, so every write —
//! execution or batch — lands in a freshly-named chunk file; reads scan
//! and merge chunks in memory.

use crate::entry::{LogEntry, LogQueryOptions, LogQueryResult, LogStorageStats};
use crate::storage::LogStorage;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use rt_storage_core::{DownloadOptions, ListOptions, Provider, UploadOptions};
use std::collections::BTreeMap;
use uuid::Uuid;

fn date_prefix(prefix: &str, category: &str, ts: DateTime<Utc>) -> String {
    format!(
        "{prefix}/{category}/{:04}/{:02}/{:02}",
        ts.year(),
        ts.month(),
        ts.day()
    )
}

fn execution_file_name(execution_id: Uuid) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("exec_{execution_id}_{nanos}.ndjson")
}

fn batch_file_name() -> String {
    let mut bytes = [0u8; 4];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    format!("batch_{}.ndjson", hex::encode(bytes))
}

/// S3-backed log storage, generic over any [`Provider`] implementation.
pub struct S3LogStorage<P: Provider> {
    provider: P,
    bucket: String,
    prefix: String,
}

impl<P: Provider> S3LogStorage<P> {
    /// `prefix` namespaces log keys within `bucket` (e.g. `"logs"`).
    #[must_use]
    pub fn new(provider: P, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            provider,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    async fn put_ndjson(&self, scope: &Scope, key: &str, lines: &[String]) -> Result<()> {
        let mut body = String::new();
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        let bytes = body.into_bytes();
        let size = bytes.len() as u64;
        let reader: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(bytes));
        self.provider
            .upload(scope, &self.bucket, key, reader, size, UploadOptions::default())
            .await?;
        Ok(())
    }

    async fn get_ndjson(&self, scope: &Scope, key: &str) -> Result<Vec<LogEntry>> {
        let (mut reader, _) = self
            .provider
            .download(scope, &self.bucket, key, DownloadOptions::default())
            .await?;
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .map_err(|e| RuntimeError::transport_failure("reading log chunk").with_source(e))?;
        let text = String::from_utf8_lossy(&buf);
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(key, error = %e, "skipping corrupt log line");
                }
            }
        }
        Ok(entries)
    }

    async fn list_keys(&self, scope: &Scope, prefix: &str) -> Result<Vec<String>> {
        let result = self
            .provider
            .list(
                scope,
                &self.bucket,
                ListOptions {
                    prefix: Some(prefix.to_string()),
                    delimiter: None,
                    max_keys: 100_000,
                },
            )
            .await?;
        Ok(result.objects.into_iter().map(|o| o.key).collect())
    }

    fn category_root(&self, category: Option<&str>) -> String {
        match category {
            Some(c) => format!("{}/{c}/", self.prefix),
            None => format!("{}/", self.prefix),
        }
    }
}

#[async_trait]
impl<P: Provider> LogStorage for S3LogStorage<P> {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn write(&self, scope: &Scope, entries: Vec<LogEntry>) -> Result<()> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log write was cancelled"));
        }
        let mut execution_groups: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
        let mut batch_groups: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        let mut last_ts = Utc::now();

        for entry in entries.into_iter().map(LogEntry::normalized) {
            last_ts = entry.timestamp.unwrap_or(last_ts);
            let line = serde_json::to_string(&entry)
                .map_err(|e| RuntimeError::protocol_violation("failed to serialize log entry").with_source(e))?;
            if let (crate::entry::LogCategory::Execution, Some(execution_id)) =
                (entry.category, entry.execution_id)
            {
                execution_groups.entry(execution_id).or_default().push(line);
            } else {
                batch_groups.entry(entry.category.as_str()).or_default().push(line);
            }
        }

        for (execution_id, lines) in execution_groups {
            let key = format!(
                "{}/{}",
                date_prefix(&self.prefix, "execution", last_ts),
                execution_file_name(execution_id)
            );
            self.put_ndjson(scope, &key, &lines).await?;
        }
        for (category, lines) in batch_groups {
            let key = format!(
                "{}/{}",
                date_prefix(&self.prefix, category, last_ts),
                batch_file_name()
            );
            self.put_ndjson(scope, &key, &lines).await?;
        }
        Ok(())
    }

    async fn query(&self, scope: &Scope, opts: LogQueryOptions) -> Result<LogQueryResult> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log query was cancelled"));
        }
        let root = self.category_root(opts.category.map(crate::entry::LogCategory::as_str));
        let keys = self.list_keys(scope, &root).await?;

        let mut matched = Vec::new();
        for key in keys {
            matched.extend(self.get_ndjson(scope, &key).await?);
        }
        matched.retain(|e| crate::entry::matches_filters(e, &opts));
        matched.sort_by_key(|e| e.timestamp.unwrap_or_default());
        if !opts.sort_asc {
            matched.reverse();
        }

        let total = matched.len() as u64;
        let page: Vec<LogEntry> = matched.into_iter().skip(opts.offset).take(opts.limit).collect();
        let has_more = opts.offset as u64 + page.len() as u64 < total;
        Ok(LogQueryResult {
            entries: page,
            total,
            has_more,
        })
    }

    async fn get_execution_logs(
        &self,
        scope: &Scope,
        execution_id: Uuid,
        after_line: i32,
    ) -> Result<Vec<LogEntry>> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log read was cancelled"));
        }
        let root = format!("{}/execution/", self.prefix);
        let marker = format!("exec_{execution_id}_");
        let keys = self
            .list_keys(scope, &root)
            .await?
            .into_iter()
            .filter(|k| k.rsplit('/').next().is_some_and(|name| name.starts_with(&marker)))
            .collect::<Vec<_>>();

        let mut entries = Vec::new();
        for key in keys {
            entries.extend(self.get_ndjson(scope, &key).await?);
        }
        entries.retain(|e| e.line_number.unwrap_or(i32::MIN) > after_line);
        entries.sort_by_key(|e| e.line_number.unwrap_or(0));
        Ok(entries)
    }

    async fn delete(&self, scope: &Scope, opts: LogQueryOptions) -> Result<u64> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log delete was cancelled"));
        }
        let has_predicate = opts.category.is_some()
            || opts.custom_category.is_some()
            || !opts.levels.is_empty()
            || opts.component.is_some()
            || opts.request_id.is_some()
            || opts.trace_id.is_some()
            || opts.user_id.is_some()
            || opts.execution_id.is_some()
            || opts.execution_type.is_some()
            || opts.time_range.is_some()
            || opts.search.is_some();
        if !has_predicate {
            return Err(RuntimeError::invalid_input(
                "refusing to delete with no predicate; supply at least one filter",
            ));
        }

        let root = self.category_root(opts.category.map(crate::entry::LogCategory::as_str));
        let keys = self.list_keys(scope, &root).await?;
        let mut removed = 0u64;

        for key in keys {
            let entries = match self.get_ndjson(scope, &key).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable log chunk during delete");
                    continue;
                }
            };
            let (to_keep, to_remove): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| !crate::entry::matches_filters(e, &opts));
            removed += to_remove.len() as u64;
            if to_remove.is_empty() {
                continue;
            }
            if to_keep.is_empty() {
                self.provider.delete(scope, &self.bucket, &key).await?;
            } else {
                let lines: Vec<String> = to_keep
                    .iter()
                    .filter_map(|e| serde_json::to_string(e).ok())
                    .collect();
                self.put_ndjson(scope, &key, &lines).await?;
            }
        }
        Ok(removed)
    }

    async fn stats(&self, _scope: &Scope) -> Result<LogStorageStats> {
        // Entry count would require scanning every chunk; only the chunk
        // count is cheap, and that isn't the same number, so report none.
        Ok(LogStorageStats::default())
    }

    async fn health(&self, scope: &Scope) -> Result<()> {
        self.provider.health(scope).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogCategory, LogLevel};
    use rt_cancel::CancelSignal;
    use rt_storage_local::LocalProvider;

    fn backend(dir: &std::path::Path) -> S3LogStorage<LocalProvider> {
        let provider = LocalProvider::new(dir, "http://localhost:8080");
        S3LogStorage::new(provider, "logs-bucket", "logs")
    }

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: None,
            category: LogCategory::System,
            level: LogLevel::Info,
            message: message.to_string(),
            custom_category: None,
            request_id: None,
            trace_id: None,
            user_id: None,
            execution_id: None,
            component: None,
            ip: None,
            fields: Default::default(),
            execution_type: None,
            line_number: None,
        }
    }

    #[tokio::test]
    async fn write_then_query_round_trips_through_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = backend(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        storage.provider.create_bucket(&scope, "logs-bucket").await.unwrap();

        storage
            .write(&scope, vec![entry("hello"), entry("world")])
            .await
            .unwrap();

        let result = storage.query(&scope, LogQueryOptions::new()).await.unwrap();
        assert_eq!(result.total, 2);
    }

    #[tokio::test]
    async fn execution_logs_scoped_to_one_execution_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = backend(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        storage.provider.create_bucket(&scope, "logs-bucket").await.unwrap();

        let exec_a = Uuid::new_v4();
        let exec_b = Uuid::new_v4();
        let mut first = entry("run a, line 1");
        first.category = LogCategory::Execution;
        first.execution_id = Some(exec_a);
        first.line_number = Some(1);
        let mut other = entry("run b, line 1");
        other.category = LogCategory::Execution;
        other.execution_id = Some(exec_b);
        other.line_number = Some(1);

        storage.write(&scope, vec![first, other]).await.unwrap();

        let logs = storage.get_execution_logs(&scope, exec_a, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].execution_id, Some(exec_a));
    }

    #[tokio::test]
    async fn delete_without_predicate_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = backend(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        assert!(storage.delete(&scope, LogQueryOptions::new()).await.is_err());
    }
}
