// SPDX-License-Identifier: MIT OR Apache-2.0
//! Contracts for the three external collaborators spec §1 names but leaves
//! out of scope: `observability::Metrics`, `database::Connection`, and
//! `credentials::JwtSecret`.
//!
//! Nothing here implements a metrics exporter, a connection pool, or
//! credential provisioning — those are host-application concerns. This
//! crate only pins down the shape every other crate in the workspace calls
//! through.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// A counter/histogram sink, mirroring the teacher's `abp-integrations`
/// metrics shape but as an object-safe trait so any host metrics exporter
/// (Prometheus, StatsD, a test spy) can be plugged in without this crate
/// depending on it.
pub trait Metrics: Send + Sync {
    /// Increment a named counter by `value`.
    fn incr_counter(&self, name: &str, value: u64);
    /// Record a single observation into a named histogram.
    fn observe_histogram(&self, name: &str, value: f64);
}

/// A [`Metrics`] sink that discards everything. Used wherever a caller
/// doesn't wire up real metrics (tests, the CLI smoke binary).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn observe_histogram(&self, _name: &str, _value: f64) {}
}

/// The pooled SQL execution handle the Postgres log backend (C12) consumes.
///
/// A type alias, not a wrapper: connection pooling, retry, and tuning are
/// the host application's concern (spec §1 Non-goals: "no schema migration
/// runner... no Postgres connection pooling internals").
pub type DatabaseConnection = sqlx::PgPool;

/// The HMAC signing secret used to mint execution tokens (C2).
///
/// A thin newtype so the secret doesn't travel through the codebase as a
/// bare `String` and accidentally end up in a `Debug` format or log line.
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    /// Wrap a raw secret value.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// `true` if the secret is empty — spec §4.2: "if secret is empty the
    /// runtime proceeds without tokens ... this is a non-fatal warning."
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw bytes for HMAC signing.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret(<redacted>)")
    }
}
