// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3-compatible object storage backend (spec C9).

mod client;
mod provider;
mod sessions;
mod sweeper;

pub use client::{build_client, S3ClientConfig};
pub use provider::{sweep_orphaned_uploads, S3Provider};
pub use sessions::SessionRegistry;
pub use sweeper::SweeperHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use rt_cancel::CancelSignal;
    use rt_storage_core::{Provider, UploadOptions};
    use std::env;

    /// These exercise `S3Provider` against a real S3-compatible endpoint
    /// (e.g. MinIO) and are skipped unless the environment is configured,
    /// mirroring how the teacher's own external-service integration tests
    /// are gated.
    fn test_config() -> Option<S3ClientConfig> {
        Some(S3ClientConfig {
            endpoint: Some(env::var("FLUXBASE_TEST_S3_ENDPOINT").ok()?),
            region: env::var("FLUXBASE_TEST_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: env::var("FLUXBASE_TEST_S3_ACCESS_KEY").ok()?,
            secret_access_key: env::var("FLUXBASE_TEST_S3_SECRET_KEY").ok()?,
            force_path_style: true,
        })
    }

    #[tokio::test]
    #[ignore = "requires a live S3-compatible endpoint; set FLUXBASE_TEST_S3_* to run"]
    async fn upload_then_download_round_trips_bytes() {
        let Some(config) = test_config() else { return };
        let provider = S3Provider::new(build_client(&config));
        let scope = CancelSignal::new().scope();
        let bucket = "fluxbase-test-bucket";

        let _ = provider.create_bucket(&scope, bucket).await;

        let body: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"hello s3".to_vec()));
        provider
            .upload(&scope, bucket, "round-trip.txt", body, 8, UploadOptions::default())
            .await
            .expect("upload should succeed");

        let (mut reader, object) = provider
            .download(&scope, bucket, "round-trip.txt", Default::default())
            .await
            .expect("download should succeed");
        assert_eq!(object.size, 8);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"hello s3");

        provider.delete(&scope, bucket, "round-trip.txt").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a live S3-compatible endpoint; set FLUXBASE_TEST_S3_* to run"]
    async fn missing_object_reports_not_found() {
        let Some(config) = test_config() else { return };
        let provider = S3Provider::new(build_client(&config));
        let scope = CancelSignal::new().scope();

        let err = provider
            .get_object(&scope, "fluxbase-test-bucket", "does-not-exist")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), rt_error::ErrorKind::NotFound);
    }

}
