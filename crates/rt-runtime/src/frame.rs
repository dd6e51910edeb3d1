// SPDX-License-Identifier: MIT OR Apache-2.0
//! The framed stdout protocol the host-injected trampoline speaks (spec §6).

use serde::Deserialize;
use std::collections::BTreeMap;

/// Prefix on a stdout line carrying a JSON-encoded [`rt_core::Progress`].
pub const PROGRESS_SENTINEL: &str = "__PROGRESS__::";

/// Prefix on the stdout line carrying the JSON-encoded terminal frame
/// ([`FunctionResponse`] or [`JobResponse`]). Printed at most once; the
/// last occurrence wins if user code somehow prints more than one.
pub const RESULT_SENTINEL: &str = "__RESULT__::";

/// The JSON shape the function trampoline prints inside `__RESULT__::`.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: String,
}

/// The JSON shape the job trampoline prints inside `__RESULT__::`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResponse {
    /// Whether the job-level call succeeded.
    pub success: bool,
    /// Structured job result, present on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error message, present on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// JS stack trace, present on failure when available.
    #[serde(default)]
    pub stack: Option<String>,
}
