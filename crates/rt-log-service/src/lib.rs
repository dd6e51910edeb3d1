// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config-driven log backend selection, batching policy, and multi-backend
//! fan-out (spec C13 "Log Service").
//!
//! [`build_backend`] turns a [`rt_config::LogServiceConfig`] plus whatever
//! dependencies it needs (a Postgres pool, a storage [`Provider`]) into a
//! ready [`LogStorage`] trait object. [`MultiLogService`] fans writes out
//! to a primary (queryable) backend and any number of secondaries — the
//! vehicle spec §9 names for "query from Postgres, archive to S3".
//! [`BufferedLogService`] owns the bounded write-buffer spec §4.13 leaves
//! to the caller: entries queue up and flush in a batch, either at
//! `batch_size` or on `flush_interval_ms`, whichever comes first.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffered;
mod multi;

pub use buffered::{BufferedLogService, BufferedLogServiceHandle};
pub use multi::MultiLogService;

use rt_collab::DatabaseConnection;
use rt_config::{LogBackendKind, LogServiceConfig};
use rt_log_storage::{LocalLogStorage, LogStorage, PostgresLogStorage, S3LogStorage};
use rt_storage_core::Provider;
use std::sync::Arc;

/// Errors from selecting or constructing a [`LogStorage`] backend.
#[derive(Debug, thiserror::Error)]
pub enum LogServiceError {
    /// Backend = `postgres` but no database connection was supplied.
    #[error("log backend 'postgres' requires a database connection")]
    MissingDatabase,
    /// Backend = `s3` but no storage provider was supplied.
    #[error("log backend 's3' requires a storage provider")]
    MissingProvider,
    /// Backend = `s3` but `config.bucket` was not set.
    #[error("log backend 's3' requires a non-empty bucket name")]
    MissingBucket,
    /// Backend = `local` but `config.prefix_or_base_path` was not set.
    #[error("log backend 'local' requires a base path")]
    MissingBasePath,
}

/// Build the [`LogStorage`] backend named by `config.backend`.
///
/// `db` is required (and only used) for [`LogBackendKind::Postgres`]; the
/// `provider`/bucket pair is required (and only used) for
/// [`LogBackendKind::S3`] — generic over `P` the same way
/// [`rt_transform_cache::TransformCache`] is, rather than forcing callers
/// through a `dyn Provider`. A `local` backend needs neither.
pub fn build_backend<P>(
    config: &LogServiceConfig,
    db: Option<DatabaseConnection>,
    provider: Option<P>,
) -> Result<Arc<dyn LogStorage>, LogServiceError>
where
    P: Provider + 'static,
{
    match config.backend {
        LogBackendKind::Postgres => {
            let pool = db.ok_or(LogServiceError::MissingDatabase)?;
            Ok(Arc::new(PostgresLogStorage::new(pool)))
        }
        LogBackendKind::S3 => {
            let provider = provider.ok_or(LogServiceError::MissingProvider)?;
            let bucket = config
                .bucket
                .clone()
                .filter(|b| !b.is_empty())
                .ok_or(LogServiceError::MissingBucket)?;
            let prefix = config
                .prefix_or_base_path
                .clone()
                .unwrap_or_else(|| "logs".to_string());
            Ok(Arc::new(S3LogStorage::new(provider, bucket, prefix)))
        }
        LogBackendKind::Local => {
            let base_path = config
                .prefix_or_base_path
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or(LogServiceError::MissingBasePath)?;
            Ok(Arc::new(LocalLogStorage::new(base_path)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_backend_without_db_is_rejected() {
        let config = LogServiceConfig {
            backend: LogBackendKind::Postgres,
            ..default_config()
        };
        let err = build_backend::<NoopProvider>(&config, None, None).unwrap_err();
        assert!(matches!(err, LogServiceError::MissingDatabase));
    }

    #[test]
    fn s3_backend_without_bucket_is_rejected_even_with_provider() {
        let config = LogServiceConfig {
            backend: LogBackendKind::S3,
            bucket: None,
            ..default_config()
        };
        let err = build_backend(&config, None, Some(NoopProvider)).unwrap_err();
        assert!(matches!(err, LogServiceError::MissingBucket));
    }

    #[test]
    fn local_backend_requires_only_a_base_path() {
        let config = LogServiceConfig {
            backend: LogBackendKind::Local,
            prefix_or_base_path: Some("/tmp/fluxbase-logs".to_string()),
            ..default_config()
        };
        assert!(build_backend::<NoopProvider>(&config, None, None).is_ok());
    }

    fn default_config() -> LogServiceConfig {
        LogServiceConfig {
            backend: LogBackendKind::Postgres,
            batch_size: 100,
            flush_interval_ms: 1000,
            buffer_size: 10_000,
            bucket: None,
            prefix_or_base_path: None,
        }
    }

    /// A `Provider` that is never actually called in these tests — only its
    /// presence/absence is exercised.
    struct NoopProvider;

    #[async_trait::async_trait]
    impl Provider for NoopProvider {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn upload(
            &self,
            _scope: &rt_cancel::Scope,
            _bucket: &str,
            _key: &str,
            _reader: rt_storage_core::BoxAsyncRead,
            _size: u64,
            _opts: rt_storage_core::UploadOptions,
        ) -> rt_error::Result<rt_storage_core::Object> {
            unreachable!("not exercised by this test")
        }

        async fn download(
            &self,
            _scope: &rt_cancel::Scope,
            _bucket: &str,
            _key: &str,
            _opts: rt_storage_core::DownloadOptions,
        ) -> rt_error::Result<(rt_storage_core::BoxAsyncRead, rt_storage_core::Object)> {
            unreachable!("not exercised by this test")
        }

        async fn delete(&self, _scope: &rt_cancel::Scope, _bucket: &str, _key: &str) -> rt_error::Result<()> {
            unreachable!("not exercised by this test")
        }

        async fn exists(&self, _scope: &rt_cancel::Scope, _bucket: &str, _key: &str) -> rt_error::Result<bool> {
            unreachable!("not exercised by this test")
        }

        async fn get_object(
            &self,
            _scope: &rt_cancel::Scope,
            _bucket: &str,
            _key: &str,
        ) -> rt_error::Result<rt_storage_core::Object> {
            unreachable!("not exercised by this test")
        }

        async fn list(
            &self,
            _scope: &rt_cancel::Scope,
            _bucket: &str,
            _opts: rt_storage_core::ListOptions,
        ) -> rt_error::Result<rt_storage_core::ListResult> {
            unreachable!("not exercised by this test")
        }

        async fn create_bucket(&self, _scope: &rt_cancel::Scope, _bucket: &str) -> rt_error::Result<()> {
            unreachable!("not exercised by this test")
        }

        async fn delete_bucket(&self, _scope: &rt_cancel::Scope, _bucket: &str) -> rt_error::Result<()> {
            unreachable!("not exercised by this test")
        }

        async fn bucket_exists(&self, _scope: &rt_cancel::Scope, _bucket: &str) -> rt_error::Result<bool> {
            unreachable!("not exercised by this test")
        }

        async fn list_buckets(&self, _scope: &rt_cancel::Scope) -> rt_error::Result<Vec<String>> {
            unreachable!("not exercised by this test")
        }

        async fn generate_signed_url(
            &self,
            _scope: &rt_cancel::Scope,
            _bucket: &str,
            _key: &str,
            _opts: rt_storage_core::SignedUrlOptions,
        ) -> rt_error::Result<String> {
            unreachable!("not exercised by this test")
        }

        async fn copy(
            &self,
            _scope: &rt_cancel::Scope,
            _src_bucket: &str,
            _src_key: &str,
            _dst_bucket: &str,
            _dst_key: &str,
        ) -> rt_error::Result<rt_storage_core::Object> {
            unreachable!("not exercised by this test")
        }

        async fn health(&self, _scope: &rt_cancel::Scope) -> rt_error::Result<()> {
            unreachable!("not exercised by this test")
        }
    }
}
