// SPDX-License-Identifier: MIT OR Apache-2.0
//! The unified log entry model (spec §3 `LogEntry`, §4.12).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// The coarse bucket a log entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    /// Platform-internal operational logs.
    System,
    /// Inbound HTTP request logs.
    Http,
    /// Security-relevant events (auth failures, policy denials).
    Security,
    /// Sandboxed execution logs (stdout/stderr of a run).
    Execution,
    /// AI/LLM-related logs.
    Ai,
    /// A caller-defined category, named in `custom_category`.
    Custom,
}

impl LogCategory {
    /// Directory/key segment name used by the S3 and local NDJSON backends.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Http => "http",
            Self::Security => "security",
            Self::Execution => "execution",
            Self::Ai => "ai",
            Self::Custom => "custom",
        }
    }
}

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained diagnostic detail.
    Trace,
    /// Debug-level detail.
    Debug,
    /// Routine informational messages.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures that did not bring the process down.
    Error,
    /// Failures that did, or are about to.
    Panic,
}

/// A single unified observability record (spec §3 `LogEntry`).
///
/// Invariants: `id` is generated at write time if absent; `timestamp` is
/// set to `now` at write time if zero; exactly one of (built-in
/// `category`, `category = Custom` + `custom_category` name) holds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    /// Unique id, generated at write time if absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Event timestamp, set to `now` at write time if absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Coarse category.
    pub category: LogCategory,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Name of the custom category, present iff `category = Custom`.
    #[serde(default)]
    pub custom_category: Option<String>,
    /// Correlating HTTP request id.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Correlating distributed-trace id.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Correlating user id.
    #[serde(default)]
    pub user_id: Option<Uuid>,
    /// Correlating execution id (sandboxed run).
    #[serde(default)]
    pub execution_id: Option<Uuid>,
    /// Component/subsystem name that emitted this entry.
    #[serde(default)]
    pub component: Option<String>,
    /// Originating IP address, if known.
    #[serde(default)]
    pub ip: Option<String>,
    /// Free-form structured fields.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Execution runtime type (`function`/`job`), stored inside `fields`
    /// on the wire (spec §4.12 "execution_type is stored inside the JSON
    /// fields map") but kept as a first-class field here for ergonomics.
    #[serde(default)]
    pub execution_type: Option<String>,
    /// Line number within an execution's log stream, used by
    /// `GetExecutionLogs`' `after_line` cursor.
    #[serde(default)]
    pub line_number: Option<i32>,
}

impl LogEntry {
    /// Fill in `id`/`timestamp` if absent (spec §3 invariant), returning
    /// a normalized copy ready to persist.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4());
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        self
    }
}

/// Query filters accepted by [`crate::LogStorage::query`] (spec §4.12
/// `LogQueryOptions`).
#[derive(Debug, Clone, Default)]
pub struct LogQueryOptions {
    /// Restrict to a built-in category.
    pub category: Option<LogCategory>,
    /// Restrict to a named custom category.
    pub custom_category: Option<String>,
    /// Restrict to one of these levels.
    pub levels: BTreeSet<LogLevel>,
    /// Restrict to a component name.
    pub component: Option<String>,
    /// Restrict to a request id.
    pub request_id: Option<String>,
    /// Restrict to a trace id.
    pub trace_id: Option<String>,
    /// Restrict to a user id.
    pub user_id: Option<Uuid>,
    /// Restrict to an execution id.
    pub execution_id: Option<Uuid>,
    /// Restrict to an execution type (`function`/`job`).
    pub execution_type: Option<String>,
    /// Restrict to `[start, end]` inclusive.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Full-text substring search over `message`.
    pub search: Option<String>,
    /// Maximum rows returned (spec default 100).
    pub limit: usize,
    /// Rows to skip before applying `limit`.
    pub offset: usize,
    /// Only return execution-log entries with `line_number > after_line`.
    pub after_line: Option<i32>,
    /// Sort ascending by timestamp (default: descending).
    pub sort_asc: bool,
    /// Exclude HTTP logs for static-asset paths (spec §4.12 Postgres
    /// backend bullet; applied uniformly across all three backends).
    pub hide_static_assets: bool,
}

impl LogQueryOptions {
    /// Spec default page size.
    pub const DEFAULT_LIMIT: usize = 100;

    /// A query with every filter unset and the spec's default pagination.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            ..Default::default()
        }
    }
}

/// Result of a [`crate::LogStorage::query`] call.
#[derive(Debug, Clone, Default)]
pub struct LogQueryResult {
    /// Matched entries, in the requested sort order.
    pub entries: Vec<LogEntry>,
    /// Total entries matching the filter (ignoring `limit`/`offset`).
    pub total: u64,
    /// Whether more entries exist beyond this page.
    pub has_more: bool,
}

/// File extensions treated as static assets for `hide_static_assets`
/// (spec §4.12 Postgres backend bullet).
pub const STATIC_ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".mjs", ".ts", ".jsx", ".tsx", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp",
    ".ico", ".avif", ".woff", ".woff2", ".ttf", ".eot", ".otf", ".map",
];

/// `true` if `path` ends in one of [`STATIC_ASSET_EXTENSIONS`].
#[must_use]
pub fn is_static_asset_path(path: &str) -> bool {
    STATIC_ASSET_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// In-memory filter predicate shared by the S3 and local backends, which
/// scan NDJSON chunks rather than pushing filters down into a query engine
/// (spec §4.12: "behavior-equivalent, differing in query performance").
#[must_use]
pub fn matches_filters(entry: &LogEntry, opts: &LogQueryOptions) -> bool {
    if let Some(category) = opts.category {
        if entry.category != category {
            return false;
        }
    }
    if let Some(custom) = &opts.custom_category {
        if entry.custom_category.as_deref() != Some(custom.as_str()) {
            return false;
        }
    }
    if !opts.levels.is_empty() && !opts.levels.contains(&entry.level) {
        return false;
    }
    if let Some(component) = &opts.component {
        if entry.component.as_deref() != Some(component.as_str()) {
            return false;
        }
    }
    if let Some(request_id) = &opts.request_id {
        if entry.request_id.as_deref() != Some(request_id.as_str()) {
            return false;
        }
    }
    if let Some(trace_id) = &opts.trace_id {
        if entry.trace_id.as_deref() != Some(trace_id.as_str()) {
            return false;
        }
    }
    if let Some(user_id) = opts.user_id {
        if entry.user_id != Some(user_id) {
            return false;
        }
    }
    if let Some(execution_id) = opts.execution_id {
        if entry.execution_id != Some(execution_id) {
            return false;
        }
    }
    if let Some(execution_type) = &opts.execution_type {
        if entry.execution_type.as_deref() != Some(execution_type.as_str()) {
            return false;
        }
    }
    if let Some((start, end)) = opts.time_range {
        let ts = entry.timestamp.unwrap_or_default();
        if ts < start || ts > end {
            return false;
        }
    }
    if let Some(after_line) = opts.after_line {
        if entry.line_number.unwrap_or(i32::MIN) <= after_line {
            return false;
        }
    }
    if let Some(search) = &opts.search {
        if !entry.message.contains(search.as_str()) {
            return false;
        }
    }
    if opts.hide_static_assets
        && entry.category == LogCategory::Http
        && entry
            .fields
            .get("path")
            .and_then(|v| v.as_str())
            .is_some_and(is_static_asset_path)
    {
        return false;
    }
    true
}

/// Liveness/diagnostic snapshot a backend reports (spec §4.12 `Stats`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LogStorageStats {
    /// Approximate total entry count, if cheaply knowable.
    pub total_entries: Option<u64>,
    /// Backend-reported size on disk/in the bucket, in bytes, if known.
    pub size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_fills_missing_id_and_timestamp() {
        let entry = LogEntry {
            id: None,
            timestamp: None,
            category: LogCategory::System,
            level: LogLevel::Info,
            message: "hello".to_string(),
            custom_category: None,
            request_id: None,
            trace_id: None,
            user_id: None,
            execution_id: None,
            component: None,
            ip: None,
            fields: BTreeMap::new(),
            execution_type: None,
            line_number: None,
        }
        .normalized();
        assert!(entry.id.is_some());
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn static_asset_paths_are_recognized() {
        assert!(is_static_asset_path("/assets/app.js"));
        assert!(is_static_asset_path("/img/logo.svg"));
        assert!(!is_static_asset_path("/api/v1/users"));
    }

    #[test]
    fn default_query_uses_spec_page_size() {
        assert_eq!(LogQueryOptions::new().limit, 100);
    }
}
