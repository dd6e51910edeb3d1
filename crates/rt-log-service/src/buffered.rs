// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded write-buffer spec §4.13 leaves to the caller: "the caller
//! is responsible for the write buffer (bounded queue → batched flush at
//! interval or at batch fill)."
//!
//! [`BufferedLogService`] owns that queue so callers don't each reinvent
//! it: entries are pushed onto a bounded `mpsc` channel and a background
//! task drains them into batches, flushing whichever of `batch_size` /
//! `flush_interval_ms` is reached first.

use rt_cancel::Scope;
use rt_log_storage::{LogEntry, LogStorage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owns the bounded write-buffer and background flush loop for one
/// [`LogStorage`] backend.
pub struct BufferedLogService {
    sender: mpsc::Sender<LogEntry>,
    task: JoinHandle<()>,
}

/// A cloneable front-end to a running [`BufferedLogService`]. Dropping the
/// last handle closes the channel; the background task flushes whatever
/// remains and then exits.
#[derive(Clone)]
pub struct BufferedLogServiceHandle {
    sender: mpsc::Sender<LogEntry>,
}

impl BufferedLogService {
    /// Spawn the background flush loop. `batch_size` triggers an early
    /// flush once that many entries are queued; `flush_interval` is the
    /// upper bound on latency between an enqueue and its flush.
    #[must_use]
    pub fn spawn(
        backend: Arc<dyn LogStorage>,
        scope: Scope,
        batch_size: usize,
        flush_interval: Duration,
        buffer_size: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<LogEntry>(buffer_size.max(1));
        let task = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            let mut ticker = tokio::time::interval(flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    entry = receiver.recv() => {
                        match entry {
                            Some(entry) => {
                                batch.push(entry);
                                if batch.len() >= batch_size {
                                    flush(&backend, &scope, &mut batch).await;
                                }
                            }
                            None => {
                                flush(&backend, &scope, &mut batch).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        flush(&backend, &scope, &mut batch).await;
                    }
                }
            }
        });
        Self { sender, task }
    }

    /// A cloneable handle callers can hand to multiple producers.
    #[must_use]
    pub fn handle(&self) -> BufferedLogServiceHandle {
        BufferedLogServiceHandle {
            sender: self.sender.clone(),
        }
    }

    /// Enqueue one entry. Blocks (asynchronously) if the buffer is full —
    /// callers that cannot tolerate backpressure should use
    /// [`BufferedLogServiceHandle::try_enqueue`] instead.
    pub async fn enqueue(&self, entry: LogEntry) -> Result<(), LogEntry> {
        self.sender.send(entry).await.map_err(|e| e.0)
    }

    /// Close the buffer, flush whatever remains, and await the background
    /// task's exit.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.task.await;
    }
}

impl BufferedLogServiceHandle {
    /// Enqueue one entry, waiting for buffer space if full.
    pub async fn enqueue(&self, entry: LogEntry) -> Result<(), LogEntry> {
        self.sender.send(entry).await.map_err(|e| e.0)
    }

    /// Enqueue one entry without waiting; fails immediately if the buffer
    /// is full or the background task has exited.
    pub fn try_enqueue(&self, entry: LogEntry) -> Result<(), LogEntry> {
        self.sender.try_send(entry).map_err(|e| match e {
            mpsc::error::TrySendError::Full(entry) => entry,
            mpsc::error::TrySendError::Closed(entry) => entry,
        })
    }
}

async fn flush(backend: &Arc<dyn LogStorage>, scope: &Scope, batch: &mut Vec<LogEntry>) {
    if batch.is_empty() {
        return;
    }
    let entries = std::mem::take(batch);
    let count = entries.len();
    if let Err(err) = backend.write(scope, entries).await {
        tracing::warn!(error = %err, count, "log batch flush failed; entries dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rt_cancel::CancelSignal;
    use rt_error::Result;
    use rt_log_storage::{LogCategory, LogLevel, LogQueryOptions, LogQueryResult, LogStorageStats};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingStorage {
        batches: Mutex<Vec<Vec<LogEntry>>>,
    }

    #[async_trait]
    impl LogStorage for RecordingStorage {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn write(&self, _scope: &Scope, entries: Vec<LogEntry>) -> Result<()> {
            self.batches.lock().unwrap().push(entries);
            Ok(())
        }

        async fn query(&self, _scope: &Scope, _opts: LogQueryOptions) -> Result<LogQueryResult> {
            Ok(LogQueryResult::default())
        }

        async fn get_execution_logs(
            &self,
            _scope: &Scope,
            _execution_id: Uuid,
            _after_line: i32,
        ) -> Result<Vec<LogEntry>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _scope: &Scope, _opts: LogQueryOptions) -> Result<u64> {
            Ok(0)
        }

        async fn stats(&self, _scope: &Scope) -> Result<LogStorageStats> {
            Ok(LogStorageStats::default())
        }

        async fn health(&self, _scope: &Scope) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn entry(n: i32) -> LogEntry {
        LogEntry {
            id: None,
            timestamp: None,
            category: LogCategory::System,
            level: LogLevel::Info,
            message: format!("entry {n}"),
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
    async fn flushes_at_batch_size_without_waiting_for_the_timer() {
        let backend = Arc::new(RecordingStorage::default());
        let cancel = CancelSignal::new();
        let service = BufferedLogService::spawn(
            backend.clone(),
            cancel.scope(),
            2,
            Duration::from_secs(60),
            16,
        );
        service.enqueue(entry(1)).await.unwrap();
        service.enqueue(entry(2)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.batches.lock().unwrap().len(), 1);
        assert_eq!(backend.batches.lock().unwrap()[0].len(), 2);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn flushes_remaining_entries_on_shutdown() {
        let backend = Arc::new(RecordingStorage::default());
        let cancel = CancelSignal::new();
        let service = BufferedLogService::spawn(
            backend.clone(),
            cancel.scope(),
            100,
            Duration::from_secs(60),
            16,
        );
        service.enqueue(entry(1)).await.unwrap();
        service.shutdown().await;

        let batches = backend.batches.lock().unwrap();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn handle_can_be_cloned_and_used_from_multiple_producers() {
        let backend = Arc::new(RecordingStorage::default());
        let cancel = CancelSignal::new();
        let service = BufferedLogService::spawn(
            backend.clone(),
            cancel.scope(),
            10,
            Duration::from_millis(20),
            16,
        );
        let handle_a = service.handle();
        let handle_b = service.handle();
        handle_a.enqueue(entry(1)).await.unwrap();
        handle_b.enqueue(entry(2)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let total: usize = backend.batches.lock().unwrap().iter().map(Vec::len).sum();
        assert_eq!(total, 2);

        service.shutdown().await;
    }
}
