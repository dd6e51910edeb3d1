// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error-kind taxonomy shared by the execution runtime and the
//! storage plane.
//!
//! Every fallible operation in this workspace ultimately resolves to one
//! of the [`ErrorKind`] variants from spec §7. The kind is machine-readable
//! (stable, used for classification and metrics) while [`RuntimeError`]
//! carries the human-readable message, an optional context map, and an
//! optional source error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The error kinds named in spec §7. Not Rust types — a stable
/// classification every subsystem maps its failures onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed path, options, or bucket name.
    InvalidInput,
    /// Object, bucket, or session does not exist.
    NotFound,
    /// Bucket/slug creation collided with an existing one.
    AlreadyExists,
    /// Bucket deletion was attempted while objects remain.
    NotEmpty,
    /// An env var was dropped by the denylist (never surfaced as a hard error).
    PermissionDenied,
    /// S3 or database transport failure.
    TransportFailure,
    /// A scoped deadline elapsed.
    DeadlineExceeded,
    /// A [`rt_cancel`](https://docs.rs/rt-cancel)-style cancel signal fired.
    Cancelled,
    /// The `__RESULT__::` frame was missing or undecodable.
    ProtocolViolation,
    /// A job subprocess was killed, inferred to be an OOM kill.
    OutOfMemory,
    /// A capability is unavailable (signing secret missing, codec not initialized).
    CapabilityUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::NotEmpty => "not_empty",
            Self::PermissionDenied => "permission_denied",
            Self::TransportFailure => "transport_failure",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::ProtocolViolation => "protocol_violation",
            Self::OutOfMemory => "out_of_memory",
            Self::CapabilityUnavailable => "capability_unavailable",
        };
        f.write_str(s)
    }
}

/// A classified, contextual error.
///
/// # Examples
///
/// ```
/// use rt_error::{ErrorKind, RuntimeError};
///
/// let err = RuntimeError::new(ErrorKind::NotFound, "object not found")
///     .with_context("bucket", "avatars")
///     .with_context("key", "a/b.png");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert!(err.to_string().contains("object not found"));
/// ```
#[derive(Debug, thiserror::Error)]
pub struct RuntimeError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RuntimeError {
    /// Build a new error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a context key/value pair. Chainable.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a source error. Chainable.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The classified kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message (without context).
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Context key/value pairs attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Shorthand constructors for each kind.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }
    /// See [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
    /// See [`ErrorKind::AlreadyExists`].
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }
    /// See [`ErrorKind::NotEmpty`].
    pub fn not_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty, message)
    }
    /// See [`ErrorKind::TransportFailure`].
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, message)
    }
    /// See [`ErrorKind::DeadlineExceeded`].
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }
    /// See [`ErrorKind::Cancelled`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
    /// See [`ErrorKind::ProtocolViolation`].
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }
    /// See [`ErrorKind::OutOfMemory`].
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfMemory, message)
    }
    /// See [`ErrorKind::CapabilityUnavailable`].
    pub fn capability_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapabilityUnavailable, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Convenient alias for fallible results across the workspace.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = RuntimeError::not_found("object missing");
        let s = err.to_string();
        assert!(s.contains("not_found"));
        assert!(s.contains("object missing"));
    }

    #[test]
    fn context_is_rendered_sorted() {
        let err = RuntimeError::invalid_input("bad path")
            .with_context("key", "a/../b")
            .with_context("bucket", "avatars");
        let s = err.to_string();
        let bucket_pos = s.find("bucket").unwrap();
        let key_pos = s.find("key").unwrap();
        assert!(bucket_pos < key_pos);
    }

    #[test]
    fn kind_roundtrips_through_serde() {
        for kind in [
            ErrorKind::InvalidInput,
            ErrorKind::NotFound,
            ErrorKind::AlreadyExists,
            ErrorKind::NotEmpty,
            ErrorKind::PermissionDenied,
            ErrorKind::TransportFailure,
            ErrorKind::DeadlineExceeded,
            ErrorKind::Cancelled,
            ErrorKind::ProtocolViolation,
            ErrorKind::OutOfMemory,
            ErrorKind::CapabilityUnavailable,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = std::io::Error::other("disk full");
        let err = RuntimeError::transport_failure("write failed").with_source(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
