// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concurrent stdout/stderr line scanning (spec §4.6 step 8, §9 "Framed I/O
//! over stdout").
//!
//! Each stream gets its own task with a 1 MiB per-line buffer, matching
//! the spec's requirement that result bodies and error stacks — which can
//! be large — are never silently truncated without a warning.

use std::sync::Arc;

use rt_core::Progress;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::frame::{PROGRESS_SENTINEL, RESULT_SENTINEL};

/// Level at which a plain (non-sentinel) line is forwarded to the log callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Non-sentinel stdout lines.
    Info,
    /// All stderr lines.
    Error,
}

/// Invoked once per parsed `__PROGRESS__::` frame, in pipe order.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;
/// Invoked once per non-sentinel line, in pipe order within its own stream.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Per-line buffer cap (spec §9): large enough that realistic result
/// bodies and stack traces are never silently truncated.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Outcome of scanning the child's stdout to completion (EOF).
#[derive(Debug, Default)]
pub struct StdoutScan {
    /// Every non-sentinel line, newline-joined, in pipe order.
    pub aggregated: String,
    /// The payload of the last `__RESULT__::` line seen, if any.
    pub last_result_line: Option<String>,
}

/// Outcome of scanning the child's stderr to completion (EOF).
#[derive(Debug, Default)]
pub struct StderrScan {
    /// Every non-empty line, newline-joined, in pipe order.
    pub aggregated: String,
}

/// Scan a child's stdout pipe until EOF, classifying each line.
pub async fn scan_stdout<R: AsyncRead + Unpin>(
    reader: R,
    progress_cb: Option<ProgressCallback>,
    log_cb: Option<LogCallback>,
) -> StdoutScan {
    let mut reader = BufReader::with_capacity(MAX_LINE_BYTES, reader);
    let mut out = StdoutScan::default();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = reader.read_until(b'\n', &mut raw).await;
        let n = match read {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "stdout scanner read error; stopping");
                break;
            }
        };
        if n == 0 {
            break;
        }
        if raw.len() >= MAX_LINE_BYTES {
            tracing::warn!(
                "stdout line exceeded {MAX_LINE_BYTES} byte buffer; line may be truncated"
            );
        }

        let text = String::from_utf8_lossy(&raw);
        let line = text.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(PROGRESS_SENTINEL) {
            match serde_json::from_str::<Progress>(rest) {
                Ok(progress) => {
                    if let Some(cb) = &progress_cb {
                        cb(progress);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "malformed __PROGRESS__:: frame; ignoring");
                }
            }
        } else if let Some(rest) = line.strip_prefix(RESULT_SENTINEL) {
            out.last_result_line = Some(rest.to_string());
        } else {
            out.aggregated.push_str(line);
            out.aggregated.push('\n');
            if let Some(cb) = &log_cb {
                cb(LogLevel::Info, line);
            }
        }
    }

    out
}

/// Scan a child's stderr pipe until EOF; every non-empty line is
/// forwarded at [`LogLevel::Error`] and appended to the aggregate.
pub async fn scan_stderr<R: AsyncRead + Unpin>(
    reader: R,
    log_cb: Option<LogCallback>,
) -> StderrScan {
    let mut reader = BufReader::with_capacity(MAX_LINE_BYTES, reader);
    let mut out = StderrScan::default();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = reader.read_until(b'\n', &mut raw).await;
        let n = match read {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "stderr scanner read error; stopping");
                break;
            }
        };
        if n == 0 {
            break;
        }
        if raw.len() >= MAX_LINE_BYTES {
            tracing::warn!(
                "stderr line exceeded {MAX_LINE_BYTES} byte buffer; line may be truncated"
            );
        }

        let text = String::from_utf8_lossy(&raw);
        let line = text.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        out.aggregated.push_str(line);
        out.aggregated.push('\n');
        if let Some(cb) = &log_cb {
            cb(LogLevel::Error, line);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn progress_lines_invoke_callback_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb: ProgressCallback = Arc::new(move |p| seen2.lock().unwrap().push(p.percent));
        let input = b"__PROGRESS__::{\"percent\":10,\"message\":null,\"data\":{}}\n__PROGRESS__::{\"percent\":50,\"message\":null,\"data\":{}}\n".as_slice();
        scan_stdout(input, Some(cb), None).await;
        assert_eq!(*seen.lock().unwrap(), vec![10, 50]);
    }

    #[tokio::test]
    async fn last_result_line_wins() {
        let input = b"__RESULT__::first\nsome log\n__RESULT__::second\n".as_slice();
        let out = scan_stdout(input, None, None).await;
        assert_eq!(out.last_result_line.as_deref(), Some("second"));
        assert_eq!(out.aggregated, "some log\n");
    }

    #[tokio::test]
    async fn plain_lines_are_aggregated_and_forwarded() {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs2 = logs.clone();
        let cb: LogCallback = Arc::new(move |lvl, line| {
            logs2.lock().unwrap().push((lvl, line.to_string()));
        });
        let input = b"hello\nworld\n".as_slice();
        let out = scan_stdout(input, None, Some(cb)).await;
        assert_eq!(out.aggregated, "hello\nworld\n");
        let logged = logs.lock().unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].0, LogLevel::Info);
    }

    #[tokio::test]
    async fn stderr_every_line_is_forwarded_at_error_level() {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs2 = logs.clone();
        let cb: LogCallback = Arc::new(move |lvl, line| {
            logs2.lock().unwrap().push((lvl, line.to_string()));
        });
        let input = b"boom\n".as_slice();
        let out = scan_stderr(input, Some(cb)).await;
        assert_eq!(out.aggregated, "boom\n");
        assert_eq!(logs.lock().unwrap()[0].0, LogLevel::Error);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let input = b"\n\nreal line\n\n".as_slice();
        let out = scan_stdout(input, None, None).await;
        assert_eq!(out.aggregated, "real line\n");
    }
}
