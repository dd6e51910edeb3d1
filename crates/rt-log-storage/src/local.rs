// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local-NDJSON [`LogStorage`] backend (spec §4.12, §6 on-disk layout).
//!
//! Files live at `<base_path>/<category>/YYYY/MM/DD/{exec_<id>.ndjson |
//! batch_<rand8>.ndjson}`. Execution-category entries are appended to a
//! single per-execution file under an exclusive lock; every other
//! category gets a fresh, uniquely-named file per batch — no lock needed
//! since the name never collides (spec §5).

use crate::entry::{LogEntry, LogQueryOptions, LogQueryResult, LogStorageStats};
use crate::storage::LogStorage;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

fn date_dir(category: &str, ts: DateTime<Utc>) -> PathBuf {
    PathBuf::from(category)
        .join(format!("{:04}", ts.year()))
        .join(format!("{:02}", ts.month()))
        .join(format!("{:02}", ts.day()))
}

fn execution_file_name(execution_id: Uuid) -> String {
    format!("exec_{execution_id}.ndjson")
}

fn batch_file_name() -> String {
    let mut bytes = [0u8; 4];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    format!("batch_{}.ndjson", hex::encode(bytes))
}

/// Local filesystem NDJSON-backed log storage.
pub struct LocalLogStorage {
    base_path: PathBuf,
    /// Serializes appends to per-execution NDJSON files (spec §5: "a
    /// read-write mutex guards appended execution-log files"). A single
    /// lock is sufficient here — executions are low-concurrency relative
    /// to HTTP/system batches, which never take it.
    append_lock: Mutex<()>,
}

impl LocalLogStorage {
    /// Root all category directories live under.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            append_lock: Mutex::new(()),
        }
    }

    async fn write_execution_entries(&self, category_ts: DateTime<Utc>, execution_id: Uuid, lines: &[String]) -> Result<()> {
        let dir = self.base_path.join(date_dir("execution", category_ts));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RuntimeError::transport_failure("creating execution log directory").with_source(e))?;
        let path = dir.join(execution_file_name(execution_id));

        let _guard = self.append_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RuntimeError::transport_failure("opening execution log file").with_source(e))?;
        for line in lines {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| RuntimeError::transport_failure("writing execution log line").with_source(e))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| RuntimeError::transport_failure("writing execution log line").with_source(e))?;
        }
        Ok(())
    }

    async fn write_batch(&self, category: &str, ts: DateTime<Utc>, lines: &[String]) -> Result<()> {
        let dir = self.base_path.join(date_dir(category, ts));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RuntimeError::transport_failure("creating log directory").with_source(e))?;
        let path = dir.join(batch_file_name());
        let mut contents = String::new();
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| RuntimeError::transport_failure("writing log batch").with_source(e))?;
        Ok(())
    }

    /// Find the on-disk path of an execution's log file, if it exists,
    /// by walking the `execution` category tree for the file name (the
    /// date subdirectory depends on when the execution started, which the
    /// caller doesn't necessarily know).
    fn find_execution_file(&self, execution_id: Uuid) -> Option<PathBuf> {
        let root = self.base_path.join("execution");
        let name = execution_file_name(execution_id);
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .find(|entry| entry.file_name().to_string_lossy() == name)
            .map(walkdir::DirEntry::into_path)
    }

    async fn read_ndjson_file(path: &Path) -> Result<Vec<LogEntry>> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RuntimeError::transport_failure("opening log file").with_source(e))?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| RuntimeError::transport_failure("reading log file").with_source(e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt log line");
                }
            }
        }
        Ok(entries)
    }

    /// All NDJSON files under `base_path`, optionally narrowed to a
    /// category directory.
    fn candidate_files(&self, category: Option<&str>) -> Vec<PathBuf> {
        let root = match category {
            Some(c) => self.base_path.join(c),
            None => self.base_path.clone(),
        };
        if !root.exists() {
            return Vec::new();
        }
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "ndjson"))
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

}

#[async_trait]
impl LogStorage for LocalLogStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn write(&self, scope: &Scope, entries: Vec<LogEntry>) -> Result<()> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log write was cancelled"));
        }
        use std::collections::BTreeMap;
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
            self.write_execution_entries(last_ts, execution_id, &lines).await?;
        }
        for (category, lines) in batch_groups {
            self.write_batch(category, last_ts, &lines).await?;
        }
        Ok(())
    }

    async fn query(&self, scope: &Scope, opts: LogQueryOptions) -> Result<LogQueryResult> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log query was cancelled"));
        }
        let files = self.candidate_files(opts.category.map(crate::entry::LogCategory::as_str));
        let mut matched = Vec::new();
        for file in files {
            matched.extend(Self::read_ndjson_file(&file).await?);
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
        let Some(path) = self.find_execution_file(execution_id) else {
            return Ok(Vec::new());
        };
        let mut entries = Self::read_ndjson_file(&path).await?;
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

        let files = self.candidate_files(opts.category.map(crate::entry::LogCategory::as_str));
        let mut removed = 0u64;
        let mut touched_dirs = std::collections::BTreeSet::new();
        for file in files {
            let entries = match Self::read_ndjson_file(&file).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "skipping unreadable log file during delete");
                    continue;
                }
            };
            let (to_keep, to_remove): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| !crate::entry::matches_filters(e, &opts));
            removed += to_remove.len() as u64;
            if to_remove.is_empty() {
                continue;
            }
            if let Some(dir) = file.parent() {
                touched_dirs.insert(dir.to_path_buf());
            }
            if to_keep.is_empty() {
                let _ = tokio::fs::remove_file(&file).await;
            } else {
                let mut contents = String::new();
                for e in &to_keep {
                    contents.push_str(&serde_json::to_string(e).unwrap_or_default());
                    contents.push('\n');
                }
                if let Err(e) = tokio::fs::write(&file, contents).await {
                    tracing::warn!(path = %file.display(), error = %e, "failed rewriting log file during delete");
                }
            }
        }

        for dir in touched_dirs {
            if let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await {
                if read_dir.next_entry().await.ok().flatten().is_none() {
                    let _ = tokio::fs::remove_dir(&dir).await;
                }
            }
        }
        Ok(removed)
    }

    async fn stats(&self, _scope: &Scope) -> Result<LogStorageStats> {
        let files = self.candidate_files(None);
        let mut size_bytes = 0u64;
        for file in &files {
            if let Ok(meta) = tokio::fs::metadata(file).await {
                size_bytes += meta.len();
            }
        }
        Ok(LogStorageStats {
            total_entries: None,
            size_bytes: Some(size_bytes),
        })
    }

    async fn health(&self, _scope: &Scope) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| RuntimeError::transport_failure("log base path is not writable").with_source(e))?;
        let probe = self.base_path.join(".health_check");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(|e| RuntimeError::transport_failure("log base path is not writable").with_source(e))?;
        let _ = tokio::fs::remove_file(&probe).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Poll-based streaming of an execution's log lines (spec §4.12 "Local-NDJSON
/// backend" `StreamExecutionLogs`).
///
/// Polls [`LogStorage::get_execution_logs`] at a 100ms cadence, forwarding
/// new entries onto a bounded channel; the channel closes once `scope` is
/// cancelled.
pub fn stream_execution_logs(
    storage: Arc<LocalLogStorage>,
    scope: Scope,
    execution_id: Uuid,
) -> tokio::sync::mpsc::Receiver<LogEntry> {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    const CHANNEL_CAPACITY: usize = 256;

    let (tx, rx) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut after_line = -1i32;
        loop {
            tokio::select! {
                biased;
                () = scope.done() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    match storage.get_execution_logs(&scope, execution_id, after_line).await {
                        Ok(entries) => {
                            for entry in entries {
                                after_line = after_line.max(entry.line_number.unwrap_or(after_line));
                                if tx.send(entry).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "execution log poll failed");
                        }
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogCategory, LogLevel};
    use rt_cancel::CancelSignal;

    fn entry(execution_id: Option<Uuid>, line: Option<i32>, message: &str) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: None,
            category: if execution_id.is_some() {
                LogCategory::Execution
            } else {
                LogCategory::System
            },
            level: LogLevel::Info,
            message: message.to_string(),
            custom_category: None,
            request_id: None,
            trace_id: None,
            user_id: None,
            execution_id,
            component: None,
            ip: None,
            fields: Default::default(),
            execution_type: None,
            line_number: line,
        }
    }

    #[tokio::test]
    async fn execution_logs_append_and_filter_by_after_line() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalLogStorage::new(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        let exec_id = Uuid::new_v4();

        storage
            .write(
                &scope,
                vec![
                    entry(Some(exec_id), Some(1), "line1"),
                    entry(Some(exec_id), Some(2), "line2"),
                    entry(Some(exec_id), Some(3), "line3"),
                ],
            )
            .await
            .unwrap();

        let logs = storage.get_execution_logs(&scope, exec_id, 1).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].line_number, Some(2));
        assert_eq!(logs[1].line_number, Some(3));
    }

    #[tokio::test]
    async fn query_filters_by_category_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalLogStorage::new(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        storage
            .write(
                &scope,
                vec![entry(None, None, "hello world"), entry(None, None, "goodbye")],
            )
            .await
            .unwrap();

        let mut opts = LogQueryOptions::new();
        opts.search = Some("hello".to_string());
        let result = storage.query(&scope, opts).await.unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.entries[0].message, "hello world");
    }

    #[tokio::test]
    async fn delete_without_predicate_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalLogStorage::new(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        assert!(storage.delete(&scope, LogQueryOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_matching_entries_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalLogStorage::new(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        storage
            .write(&scope, vec![entry(None, None, "will be deleted")])
            .await
            .unwrap();

        let mut opts = LogQueryOptions::new();
        opts.search = Some("deleted".to_string());
        let removed = storage.delete(&scope, opts).await.unwrap();
        assert_eq!(removed, 1);

        let total = storage.query(&scope, LogQueryOptions::new()).await.unwrap().total;
        assert_eq!(total, 0);
    }
}
