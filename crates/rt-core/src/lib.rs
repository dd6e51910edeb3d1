// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "rt-core"]
//! rt-core
//!
//! The stable data model shared by the execution runtime: [`ExecutionRequest`],
//! [`ExecutionResult`], [`Progress`], and [`Permissions`] (spec §3).
//!
//! If you only take one dependency from the execution side, take this one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which sandboxed runtime flavor this request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// A short-lived HTTP edge function.
    Function,
    /// A long-running background job.
    Job,
}

impl RuntimeType {
    /// The default timeout for this runtime type (spec §4.6 step 1):
    /// 30s for functions, 300s for jobs.
    #[must_use]
    pub fn default_timeout(self) -> std::time::Duration {
        match self {
            RuntimeType::Function => std::time::Duration::from_secs(30),
            RuntimeType::Job => std::time::Duration::from_secs(300),
        }
    }

    /// Short name used in env-var prefixes (`FLUXBASE_FUNCTION_*` / `FLUXBASE_JOB_*`).
    #[must_use]
    pub fn env_prefix(self) -> &'static str {
        match self {
            RuntimeType::Function => "FUNCTION",
            RuntimeType::Job => "JOB",
        }
    }
}

/// Immutable dispatch record for a single execution (spec §3 `ExecutionRequest`).
///
/// Constructed once by the external dispatcher, consumed once by the
/// runtime, and serialized as JSON into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionRequest {
    /// Unique identifier for this execution.
    pub id: Uuid,
    /// Function or job name.
    pub name: String,
    /// Namespace the function/job belongs to.
    pub namespace: String,
    /// Id of the actor that triggered this execution, if any.
    pub actor_id: Option<String>,
    /// Email of the actor, if known.
    pub actor_email: Option<String>,
    /// Role of the actor (defaults to `"authenticated"` when minting tokens).
    pub actor_role: Option<String>,
    /// URL that originated this request (e.g. the inbound HTTP request URL).
    pub origin_url: Option<String>,
    /// Base URL of the platform, used to build absolute asset/API URLs.
    pub base_url: Option<String>,
    /// The HTTP-shaped or job-shaped payload.
    pub shape: RequestShape,
}

/// Either an HTTP-shaped or a job-shaped request payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestShape {
    /// HTTP function invocation.
    Http {
        /// HTTP method (`GET`, `POST`, …).
        method: String,
        /// Request URL.
        url: String,
        /// Request headers.
        headers: BTreeMap<String, String>,
        /// Raw request body, if any.
        body: Option<String>,
        /// Path/query parameters.
        params: BTreeMap<String, String>,
        /// Session id, if the caller was authenticated.
        session_id: Option<String>,
    },
    /// Background job invocation.
    Job {
        /// Arbitrary job payload.
        payload: BTreeMap<String, serde_json::Value>,
        /// Number of times this job has already been retried.
        retry_count: u32,
    },
}

impl ExecutionRequest {
    /// The [`RuntimeType`] implied by this request's shape.
    #[must_use]
    pub fn runtime_type(&self) -> RuntimeType {
        match &self.shape {
            RequestShape::Http { .. } => RuntimeType::Function,
            RequestShape::Job { .. } => RuntimeType::Job,
        }
    }
}

/// Terminal outcome of an execution (spec §3 `ExecutionResult`).
///
/// Allocated at start, fields filled in as the outcome is classified,
/// returned exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    /// Whether the execution succeeded.
    pub success: bool,
    /// Error message, present iff `success` is `false` (or a non-fatal warning occurred).
    pub error: Option<String>,
    /// Accumulated stderr text for the whole run.
    pub stderr_log: String,
    /// Wall-clock duration of the run, in milliseconds.
    pub duration_ms: u64,
    /// The variant-specific part of the outcome.
    pub outcome: ExecutionOutcome,
}

/// The runtime-type-specific portion of an [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// HTTP function result.
    Http {
        /// HTTP status code. Success iff `200 <= status < 400`.
        status: u16,
        /// Response headers.
        headers: BTreeMap<String, String>,
        /// Response body.
        body: String,
    },
    /// Background job result.
    Job {
        /// Arbitrary structured result, present on success.
        result: Option<serde_json::Value>,
    },
}

impl ExecutionResult {
    /// `true` for HTTP outcomes whose status is in `[200, 400)`.
    #[must_use]
    pub fn is_http_success(&self) -> bool {
        matches!(&self.outcome, ExecutionOutcome::Http { status, .. } if (200..400).contains(status))
    }
}

/// A mid-execution progress update (spec §3 `Progress`).
///
/// Produced unboundedly by user code during a run and delivered to the
/// host via callback; `estimated_seconds_left` is filled in by a
/// consumer of the callback, never by the sandbox itself.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Progress {
    /// Integer percent complete, typically `0..=100` but not clamped here.
    pub percent: i32,
    /// Optional human-readable status message.
    pub message: Option<String>,
    /// Arbitrary structured data accompanying the update.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
    /// Estimated seconds remaining; always `None` as produced by the
    /// sandbox, filled in by a downstream consumer that tracks velocity.
    #[serde(default)]
    pub estimated_seconds_left: Option<f64>,
}

/// Declarative capability grant for a single run (spec §3 `Permissions`).
///
/// Invariant: the runtime grants exactly the declared capabilities;
/// network is additionally granted when either issued token is non-empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
pub struct Permissions {
    /// Grant outbound network access.
    pub allow_net: bool,
    /// Grant access to environment variables.
    pub allow_env: bool,
    /// Grant filesystem read access.
    pub allow_read: bool,
    /// Grant filesystem write access.
    pub allow_write: bool,
    /// Hard cap on the V8 heap, in megabytes. `0` means unset/unbounded.
    pub memory_limit_mb: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_match_spec() {
        assert_eq!(
            RuntimeType::Function.default_timeout(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            RuntimeType::Job.default_timeout(),
            std::time::Duration::from_secs(300)
        );
    }

    #[test]
    fn runtime_type_follows_shape() {
        let req = ExecutionRequest {
            id: Uuid::nil(),
            name: "f".into(),
            namespace: "ns".into(),
            actor_id: None,
            actor_email: None,
            actor_role: None,
            origin_url: None,
            base_url: None,
            shape: RequestShape::Http {
                method: "GET".into(),
                url: "/".into(),
                headers: BTreeMap::new(),
                body: None,
                params: BTreeMap::new(),
                session_id: None,
            },
        };
        assert_eq!(req.runtime_type(), RuntimeType::Function);
    }

    #[test]
    fn http_success_requires_2xx_or_3xx() {
        let mk = |status| ExecutionResult {
            success: true,
            error: None,
            stderr_log: String::new(),
            duration_ms: 0,
            outcome: ExecutionOutcome::Http {
                status,
                headers: BTreeMap::new(),
                body: String::new(),
            },
        };
        assert!(mk(200).is_http_success());
        assert!(mk(399).is_http_success());
        assert!(!mk(400).is_http_success());
        assert!(!mk(199).is_http_success());
    }

    #[test]
    fn progress_estimated_seconds_defaults_to_none() {
        let json = r#"{"percent": 50, "message": "halfway", "data": {}}"#;
        let p: Progress = serde_json::from_str(json).unwrap();
        assert_eq!(p.estimated_seconds_left, None);
    }

    #[test]
    fn permissions_default_denies_everything() {
        let p = Permissions::default();
        assert!(!p.allow_net);
        assert!(!p.allow_env);
        assert!(!p.allow_read);
        assert!(!p.allow_write);
        assert_eq!(p.memory_limit_mb, 0);
    }
}
