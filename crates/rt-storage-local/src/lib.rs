// SPDX-License-Identifier: MIT OR Apache-2.0
//! POSIX filesystem storage backend (spec C8).
//!
//! Objects live at `<base_path>/<bucket>/<key>` with an optional
//! `<key>.meta` sidecar; chunked uploads live under `.chunked/<upload_id>/`.
//! Signed URLs are HMAC-SHA256 sealed tokens, not presigned query strings —
//! there is no cloud IAM to delegate to.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chunked;
mod meta;
mod provider;
mod signed_url;
mod sweeper;

pub use provider::LocalProvider;
pub use signed_url::{SignedUrlRecord, SIGNED_URL_PATH};
pub use sweeper::SweeperHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use rt_cancel::CancelSignal;
    use rt_storage_core::{ChunkedUpload, DownloadOptions, ListOptions, Provider, UploadOptions};
    use tokio::io::AsyncReadExt;

    fn provider(dir: &std::path::Path) -> LocalProvider {
        LocalProvider::new(dir, "http://localhost:8080").with_signing_secret(b"test-secret".to_vec())
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "avatars").await.unwrap();
        let body: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"hello world".to_vec()));
        let obj = p
            .upload(&scope, "avatars", "a/b.png", body, 11, UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(obj.size, 11);

        let (mut reader, downloaded) = p
            .download(&scope, "avatars", "a/b.png", DownloadOptions::default())
            .await
            .unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");
        assert_eq!(downloaded.etag, obj.etag);
    }

    #[tokio::test]
    async fn delete_removes_object_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "b").await.unwrap();
        let body: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        p.upload(&scope, "b", "k", body, 1, UploadOptions::default())
            .await
            .unwrap();
        assert!(p.exists(&scope, "b", "k").await.unwrap());

        p.delete(&scope, "b", "k").await.unwrap();
        assert!(!p.exists(&scope, "b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn delete_nonempty_bucket_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "b").await.unwrap();
        let body: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        p.upload(&scope, "b", "k", body, 1, UploadOptions::default())
            .await
            .unwrap();

        assert!(p.delete_bucket(&scope, "b").await.is_err());
    }

    #[tokio::test]
    async fn list_groups_by_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "b").await.unwrap();
        for key in ["a/1.png", "a/2.png", "b.png"] {
            let body: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
            p.upload(&scope, "b", key, body, 1, UploadOptions::default())
                .await
                .unwrap();
        }

        let result = p
            .list(
                &scope,
                "b",
                ListOptions {
                    prefix: None,
                    delimiter: Some("/".to_string()),
                    max_keys: 1000,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key, "b.png");
    }

    #[tokio::test]
    async fn signed_url_round_trips_through_provider() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        let url = p
            .generate_signed_url(&scope, "b", "k", rt_storage_core::SignedUrlOptions::default())
            .await
            .unwrap();
        let token = url.split("token=").nth(1).unwrap();
        let (bucket, key, method) = p.validate_signed_url_basic(token).unwrap();
        assert_eq!(bucket, "b");
        assert_eq!(key, "k");
        assert_eq!(method, "GET");
    }

    #[tokio::test]
    async fn chunked_upload_completes_and_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "b").await.unwrap();
        let session = p
            .init_chunked_upload(&scope, "b", "big.bin", 6, 3, UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(session.total_chunks, 2);

        let chunk0: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"abc".to_vec()));
        p.upload_chunk(&scope, &session.upload_id, 0, chunk0, 3)
            .await
            .unwrap();
        let chunk1: rt_storage_core::BoxAsyncRead = Box::pin(std::io::Cursor::new(b"def".to_vec()));
        p.upload_chunk(&scope, &session.upload_id, 1, chunk1, 3)
            .await
            .unwrap();

        let refreshed = p.get_chunked_upload(&scope, &session.upload_id).await.unwrap();
        assert!(refreshed.is_fully_uploaded());

        let obj = p.complete_chunked_upload(&scope, &session.upload_id).await.unwrap();
        assert_eq!(obj.size, 6);

        let (mut reader, _) = p
            .download(&scope, "b", "big.bin", DownloadOptions::default())
            .await
            .unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abcdef");
    }

    #[tokio::test]
    async fn abort_removes_session_without_creating_object() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();

        p.create_bucket(&scope, "b").await.unwrap();
        let session = p
            .init_chunked_upload(&scope, "b", "k", 3, 3, UploadOptions::default())
            .await
            .unwrap();
        p.abort_chunked_upload(&scope, &session.upload_id).await.unwrap();
        assert!(p.get_chunked_upload(&scope, &session.upload_id).await.is_err());
        assert!(!p.exists(&scope, "b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn health_check_passes_for_valid_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let signal = CancelSignal::new();
        let scope = signal.scope();
        p.health(&scope).await.unwrap();
    }
}
