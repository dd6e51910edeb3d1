// SPDX-License-Identifier: MIT OR Apache-2.0
//! The central execution-runtime orchestrator (spec C6).
//!
//! [`Runtime::execute`] runs one sandboxed invocation end to end: mint
//! tokens (C2), reshape the source (C3), optionally bundle and validate
//! it (C5), build the child environment (C4), spawn the interpreter under
//! capability flags, stream its stdout/stderr concurrently, and classify
//! the outcome in the strict priority order spec §4.6 step 10 describes —
//! timeout, then cancellation, then non-zero exit, then the framed result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
mod frame;
mod scan;
pub mod wrap;

pub use frame::{FunctionResponse, JobResponse, PROGRESS_SENTINEL, RESULT_SENTINEL};
pub use scan::{LogCallback, LogLevel, ProgressCallback};

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rt_cancel::{CancelSignal, Scope};
use rt_core::{ExecutionRequest, ExecutionResult, Permissions, RuntimeType};

/// Default interpreter binary name, searched on `PATH` first.
pub const DEFAULT_INTERPRETER_BIN: &str = "deno";

/// Fallback directories consulted when the interpreter isn't on `PATH`
/// (spec §6: "falls back to a small allowlist of common install paths").
#[must_use]
pub fn default_interpreter_fallback_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/bin"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(home).join(".deno").join("bin"));
    }
    dirs
}

/// Configuration for a [`Runtime`] instance. Stores only configured
/// defaults; no per-call state is retained between executions.
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Interpreter executable name or path.
    pub interpreter_bin: String,
    /// Fallback directories for interpreter discovery.
    pub interpreter_fallback_dirs: Vec<PathBuf>,
    /// Bundler executable name, if pre-bundling is enabled. `None` skips
    /// bundling entirely and always runs the source as-is.
    pub bundler_bin: Option<String>,
    /// Fallback directories for bundler discovery.
    pub bundler_fallback_dirs: Vec<PathBuf>,
    /// HS256 signing secret for minted tokens. Empty disables minting.
    pub signing_secret: String,
    /// Public base URL, exposed to the sandbox as `FLUXBASE_URL`.
    pub public_url: Option<String>,
    /// Directory scoped temp files are written under.
    pub temp_dir: PathBuf,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            interpreter_bin: DEFAULT_INTERPRETER_BIN.to_string(),
            interpreter_fallback_dirs: default_interpreter_fallback_dirs(),
            bundler_bin: None,
            bundler_fallback_dirs: Vec::new(),
            signing_secret: String::new(),
            public_url: None,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// The central execution-runtime orchestrator (spec C6).
///
/// Holds only configured defaults and optional progress/log callbacks —
/// no state is shared between calls to [`execute`](Self::execute).
#[derive(Clone)]
pub struct Runtime {
    options: RuntimeOptions,
    progress_callback: Option<ProgressCallback>,
    log_callback: Option<LogCallback>,
}

impl Runtime {
    /// Build a runtime with the given options and no callbacks registered.
    #[must_use]
    pub fn new(options: RuntimeOptions) -> Self {
        Self {
            options,
            progress_callback: None,
            log_callback: None,
        }
    }

    /// Register a callback invoked for every `__PROGRESS__::` frame, in pipe order.
    #[must_use]
    pub fn with_progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Register a callback invoked for every non-sentinel stdout/stderr line.
    #[must_use]
    pub fn with_log_callback(mut self, cb: LogCallback) -> Self {
        self.log_callback = Some(cb);
        self
    }

    /// Run one execution end to end (spec §4.6).
    ///
    /// `parent_scope` is the caller's cancellation scope (e.g. derived
    /// from an HTTP request lifetime); `cancel_signal` is the caller-held
    /// latch a host can fire mid-run. Either source terminates the child.
    pub async fn execute(
        &self,
        parent_scope: &Scope,
        code: &str,
        request: &ExecutionRequest,
        permissions: Permissions,
        cancel_signal: &CancelSignal,
        secrets: &BTreeMap<String, String>,
        timeout_override: Option<Duration>,
    ) -> ExecutionResult {
        let runtime_type = request.runtime_type();
        let started = Instant::now();

        // Step 1: effective timeout.
        let effective_timeout = timeout_override
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| runtime_type.default_timeout());

        // Step 2: scoped cancellation — derive a child scope from the
        // caller's scope that also listens to the cancel signal.
        let timeout_scope = parent_scope.child();
        let signal_scope = cancel_signal.scope();

        // Step 3: tokens (non-fatal on failure; `rt_tokens::mint` already
        // logs the warning and returns empty tokens on an empty secret).
        let tokens = rt_tokens::mint(
            &self.options.signing_secret,
            request,
            runtime_type,
            effective_timeout,
        );
        let grant_net = permissions.allow_net || tokens.any_issued();

        // Bundling (C5), ahead of the import-split reshape, then
        // forbidden-module validation over whatever text will actually run.
        let runnable_code = match self.maybe_bundle(code).await {
            Ok(code) => code,
            Err(err) => {
                return early_failure(runtime_type, started, err.to_string());
            }
        };
        if let Err(err) = rt_bundle::validate_imports(&runnable_code) {
            return early_failure(runtime_type, started, err.to_string());
        }

        // Step 4: reshape (C3) then wrap with the host bridge.
        let (imports, remainder) = rt_import_split::split(&runnable_code);
        let wrapped = wrap::wrap(&imports, &remainder, request, runtime_type, &tokens);

        // Step 5: write to a scoped temp file named with runtime type + execution id.
        let temp_path = self.options.temp_dir.join(format!(
            "fluxbase-{}-{}.ts",
            runtime_type.env_prefix().to_lowercase(),
            request.id
        ));
        if let Err(err) = tokio::fs::write(&temp_path, &wrapped).await {
            return early_failure(
                runtime_type,
                started,
                format!("failed to write sandbox source: {err}"),
            );
        }
        let _cleanup = TempFileGuard(&temp_path);

        // Step 6: build the child command (capability flags + environment).
        let parent_env: BTreeMap<String, String> = std::env::vars().collect();
        let secret_names: Vec<&str> = secrets.keys().map(String::as_str).collect();
        let allow_env_value = rt_env::allowed_env_vars(runtime_type, secret_names.into_iter());
        let env = rt_env::build(&rt_env::EnvInput {
            parent_env: &parent_env,
            public_url: self.options.public_url.as_deref(),
            runtime_type,
            execution_id: request.id,
            name: &request.name,
            namespace: &request.namespace,
            user_token: tokens.user_token.as_deref(),
            service_token: tokens.service_token.as_deref(),
            cancelled: cancel_signal.is_cancelled(),
            secrets,
        });

        let Some(interpreter) = rt_which::which_with_fallback(
            &self.options.interpreter_bin,
            &self.options.interpreter_fallback_dirs,
        ) else {
            return early_failure(
                runtime_type,
                started,
                format!(
                    "interpreter '{}' not found on PATH or fallback directories",
                    self.options.interpreter_bin
                ),
            );
        };

        let ram_at_start = command::system_ram_mb();
        let mut cmd = command::build_command(
            &interpreter,
            &temp_path,
            permissions,
            grant_net,
            Some(&allow_env_value),
            &env,
        );
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Step 7: start the process.
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return early_failure(
                    runtime_type,
                    started,
                    format!("failed to spawn interpreter: {err}"),
                );
            }
        };
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // Step 8: scan stdout/stderr concurrently.
        let stdout_task = tokio::spawn(scan::scan_stdout(
            stdout,
            self.progress_callback.clone(),
            self.log_callback.clone(),
        ));
        let stderr_task = tokio::spawn(scan::scan_stderr(stderr, self.log_callback.clone()));

        let sleep = tokio::time::sleep(effective_timeout);
        tokio::pin!(sleep);

        let race = tokio::select! {
            status = child.wait() => Race::Exited(status),
            () = &mut sleep => Race::TimedOut,
            () = signal_scope.done() => Race::Cancelled,
            () = timeout_scope.done() => Race::Cancelled,
        };

        // Step 9: await completion of both process and scanners.
        let race = match race {
            Race::Exited(status) => Race::Exited(status),
            other => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                other
            }
        };
        let stdout_scan = stdout_task.await.unwrap_or_default();
        let stderr_scan = stderr_task.await.unwrap_or_default();

        let duration_ms = started.elapsed().as_millis() as u64;

        // Step 10: classify, in strict priority order.
        match race {
            Race::TimedOut => timeout_result(
                runtime_type,
                duration_ms,
                stderr_scan.aggregated,
                effective_timeout,
            ),
            Race::Cancelled => cancelled_result(runtime_type, duration_ms, stderr_scan.aggregated),
            Race::Exited(Err(err)) => execution_failed_result(
                runtime_type,
                duration_ms,
                stderr_scan.aggregated,
                format!("failed to await interpreter: {err}"),
            ),
            Race::Exited(Ok(status)) if !status.success() => {
                if runtime_type == RuntimeType::Job {
                    if let Some(signal) = status.signal() {
                        let message = oom_message(permissions.memory_limit_mb, ram_at_start);
                        tracing::warn!(signal, "interpreter killed by signal");
                        return job_failure(duration_ms, stderr_scan.aggregated, message);
                    }
                }
                let message = format!(
                    "interpreter exited with {}",
                    status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "no exit code".to_string())
                );
                execution_failed_result(runtime_type, duration_ms, stderr_scan.aggregated, message)
            }
            Race::Exited(Ok(_status)) => classify_success(
                runtime_type,
                duration_ms,
                stdout_scan,
                stderr_scan.aggregated,
            ),
        }
    }

    async fn maybe_bundle(&self, code: &str) -> rt_error::Result<String> {
        let Some(bundler_bin) = &self.options.bundler_bin else {
            return Ok(code.to_string());
        };
        if !rt_bundle::needs_bundle(code) {
            return Ok(code.to_string());
        }
        let result =
            rt_bundle::bundle(bundler_bin, &self.options.bundler_fallback_dirs, code).await?;
        Ok(result.bundled_code)
    }
}

enum Race {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

struct TempFileGuard<'a>(&'a PathBuf);

impl Drop for TempFileGuard<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.0);
    }
}

fn early_failure(runtime_type: RuntimeType, started: Instant, message: String) -> ExecutionResult {
    execution_failed_result(
        runtime_type,
        started.elapsed().as_millis() as u64,
        String::new(),
        message,
    )
}

fn timeout_result(
    runtime_type: RuntimeType,
    duration_ms: u64,
    stderr_log: String,
    timeout: Duration,
) -> ExecutionResult {
    let message = format!("Execution timeout after {}ms", timeout.as_millis());
    ExecutionResult {
        success: false,
        error: Some(message.clone()),
        stderr_log,
        duration_ms,
        outcome: outcome_for_failure(runtime_type, 504, message),
    }
}

fn cancelled_result(runtime_type: RuntimeType, duration_ms: u64, stderr_log: String) -> ExecutionResult {
    let message = "Execution was cancelled".to_string();
    ExecutionResult {
        success: false,
        error: Some(message.clone()),
        stderr_log,
        duration_ms,
        outcome: outcome_for_failure(runtime_type, 499, message),
    }
}

fn execution_failed_result(
    runtime_type: RuntimeType,
    duration_ms: u64,
    stderr_log: String,
    message: String,
) -> ExecutionResult {
    ExecutionResult {
        success: false,
        error: Some(message.clone()),
        stderr_log,
        duration_ms,
        outcome: outcome_for_failure(runtime_type, 500, message),
    }
}

fn job_failure(duration_ms: u64, stderr_log: String, message: String) -> ExecutionResult {
    ExecutionResult {
        success: false,
        error: Some(message),
        stderr_log,
        duration_ms,
        outcome: rt_core::ExecutionOutcome::Job { result: None },
    }
}

fn oom_message(requested_mb: u32, ram_at_start: Option<command::SystemRam>) -> String {
    match ram_at_start {
        Some(ram) => format!(
            "Killed (Out of Memory): requested {requested_mb}MB, {}MB available at start, {}MB system total",
            ram.available_mb, ram.total_mb
        ),
        None => format!("Killed (Out of Memory): requested {requested_mb}MB"),
    }
}

fn outcome_for_failure(runtime_type: RuntimeType, status: u16, message: String) -> rt_core::ExecutionOutcome {
    match runtime_type {
        RuntimeType::Function => rt_core::ExecutionOutcome::Http {
            status,
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: serde_json::json!({ "error": message }).to_string(),
        },
        RuntimeType::Job => rt_core::ExecutionOutcome::Job { result: None },
    }
}

fn classify_success(
    runtime_type: RuntimeType,
    duration_ms: u64,
    stdout_scan: scan::StdoutScan,
    stderr_log: String,
) -> ExecutionResult {
    match runtime_type {
        RuntimeType::Function => classify_function_success(duration_ms, stdout_scan, stderr_log),
        RuntimeType::Job => classify_job_success(duration_ms, stdout_scan, stderr_log),
    }
}

fn classify_function_success(
    duration_ms: u64,
    stdout_scan: scan::StdoutScan,
    stderr_log: String,
) -> ExecutionResult {
    let (status, headers, body) = match stdout_scan.last_result_line {
        Some(frame) => match serde_json::from_str::<FunctionResponse>(&frame) {
            Ok(resp) => (resp.status, resp.headers, resp.body),
            Err(err) => {
                return ExecutionResult {
                    success: false,
                    error: Some(format!("malformed result frame: {err}")),
                    stderr_log,
                    duration_ms,
                    outcome: rt_core::ExecutionOutcome::Http {
                        status: 500,
                        headers: BTreeMap::new(),
                        body: String::new(),
                    },
                };
            }
        },
        None => {
            let trimmed = stdout_scan.aggregated.trim();
            match serde_json::from_str::<FunctionResponse>(trimmed) {
                Ok(resp) => (resp.status, resp.headers, resp.body),
                Err(_) => (200, BTreeMap::new(), trimmed.to_string()),
            }
        }
    };
    let success = (200..400).contains(&status);
    ExecutionResult {
        success,
        error: if success {
            None
        } else {
            Some(format!("function returned status {status}"))
        },
        stderr_log,
        duration_ms,
        outcome: rt_core::ExecutionOutcome::Http {
            status,
            headers,
            body,
        },
    }
}

fn classify_job_success(
    duration_ms: u64,
    stdout_scan: scan::StdoutScan,
    stderr_log: String,
) -> ExecutionResult {
    match stdout_scan.last_result_line {
        Some(frame) => match serde_json::from_str::<JobResponse>(&frame) {
            Ok(resp) => ExecutionResult {
                success: resp.success,
                error: resp.error,
                stderr_log,
                duration_ms,
                outcome: rt_core::ExecutionOutcome::Job { result: resp.result },
            },
            Err(err) => ExecutionResult {
                success: false,
                error: Some(format!("malformed result frame: {err}")),
                stderr_log,
                duration_ms,
                outcome: rt_core::ExecutionOutcome::Job { result: None },
            },
        },
        None => {
            if stderr_log.contains("error") || stderr_log.contains("Error") {
                ExecutionResult {
                    success: false,
                    error: Some(stderr_log.clone()),
                    stderr_log,
                    duration_ms,
                    outcome: rt_core::ExecutionOutcome::Job { result: None },
                }
            } else {
                ExecutionResult {
                    success: true,
                    error: None,
                    stderr_log,
                    duration_ms,
                    outcome: rt_core::ExecutionOutcome::Job { result: None },
                }
            }
        }
    }
}
