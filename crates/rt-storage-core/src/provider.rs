// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Provider` contract (spec §4.7) and the secondary `ChunkedUpload`
//! capability, implemented differently by each backend (sidecar directory
//! vs. native multipart — spec §9 "Storage polymorphism").

use crate::object::{
    ChunkedUploadSession, DownloadOptions, ListOptions, ListResult, Object, SignedUrlOptions,
    UploadOptions,
};
use async_trait::async_trait;
use rt_cancel::Scope;
use rt_error::Result;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A boxed, already-pinned async byte stream. Callers box their own reader
/// (a file, an in-memory cursor, an HTTP body) before handing it to
/// [`Provider::upload`]; this keeps the trait object-safe without a
/// generic method parameter.
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Result of uploading one chunk in a chunked-upload session.
#[derive(Debug, Clone)]
pub struct ChunkUploadResult {
    /// The chunk index that was written.
    pub index: u32,
    /// MD5 hex digest of the chunk's bytes.
    pub etag: String,
    /// Number of bytes written.
    pub bytes: u64,
}

/// Uniform contract every storage backend implements (spec §4.7 Provider
/// table). All operations take a cancellation [`Scope`] so an in-flight
/// transfer can be aborted the same way an execution's subprocess can.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short, stable backend name (`"local"`, `"s3"`) for logging/metrics.
    fn name(&self) -> &'static str;

    /// Upload `size` bytes from `reader` to `bucket/key`.
    async fn upload(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        reader: BoxAsyncRead,
        size: u64,
        opts: UploadOptions,
    ) -> Result<Object>;

    /// Open a reader for `bucket/key`, optionally bounded to a byte range.
    async fn download(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        opts: DownloadOptions,
    ) -> Result<(BoxAsyncRead, Object)>;

    /// Remove `bucket/key`.
    async fn delete(&self, scope: &Scope, bucket: &str, key: &str) -> Result<()>;

    /// `true` if `bucket/key` exists.
    async fn exists(&self, scope: &Scope, bucket: &str, key: &str) -> Result<bool>;

    /// Fetch metadata for `bucket/key` without downloading the payload.
    async fn get_object(&self, scope: &Scope, bucket: &str, key: &str) -> Result<Object>;

    /// List objects in `bucket` matching `opts`.
    async fn list(&self, scope: &Scope, bucket: &str, opts: ListOptions) -> Result<ListResult>;

    /// Create a new, empty bucket.
    async fn create_bucket(&self, scope: &Scope, bucket: &str) -> Result<()>;

    /// Delete an empty bucket. Fails with [`rt_error::ErrorKind::NotEmpty`]
    /// if any object remains.
    async fn delete_bucket(&self, scope: &Scope, bucket: &str) -> Result<()>;

    /// `true` if `bucket` exists.
    async fn bucket_exists(&self, scope: &Scope, bucket: &str) -> Result<bool>;

    /// List every bucket name known to this backend.
    async fn list_buckets(&self, scope: &Scope) -> Result<Vec<String>>;

    /// Produce an HMAC-signed (local) or natively-presigned (S3) URL.
    async fn generate_signed_url(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        opts: SignedUrlOptions,
    ) -> Result<String>;

    /// Copy `src` to `dst`, leaving `src` in place.
    async fn copy(
        &self,
        scope: &Scope,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object>;

    /// Copy `src` to `dst`, then delete `src`.
    async fn mv(
        &self,
        scope: &Scope,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object> {
        let obj = self.copy(scope, src_bucket, src_key, dst_bucket, dst_key).await?;
        self.delete(scope, src_bucket, src_key).await?;
        Ok(obj)
    }

    /// Liveness check: the backend can currently serve requests.
    async fn health(&self, scope: &Scope) -> Result<()>;
}

/// The chunked-upload capability (spec §3 `ChunkedUploadSession`, §4.8/§4.9).
///
/// A secondary capability, not part of [`Provider`] itself: the local
/// backend tracks a sidecar directory of raw chunk files, the S3 backend
/// delegates to native multipart upload. Both converge on this same
/// surface.
#[async_trait]
pub trait ChunkedUpload: Send + Sync {
    /// Start a new chunked upload session.
    #[allow(clippy::too_many_arguments)]
    async fn init_chunked_upload(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        total_size: u64,
        chunk_size: u64,
        opts: UploadOptions,
    ) -> Result<ChunkedUploadSession>;

    /// Upload one chunk. Callers are responsible for tracking which
    /// indices have completed; [`Self::get_chunked_upload`] reports the
    /// authoritative state.
    async fn upload_chunk(
        &self,
        scope: &Scope,
        upload_id: &str,
        index: u32,
        reader: BoxAsyncRead,
        size: u64,
    ) -> Result<ChunkUploadResult>;

    /// Finalize the session: assemble the final object and return its
    /// metadata. Fails if any chunk is missing.
    async fn complete_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<Object>;

    /// Abandon the session and discard all uploaded chunk data.
    async fn abort_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<()>;

    /// Fetch the current session state.
    async fn get_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<ChunkedUploadSession>;

    /// Sweep sessions past their expiry. Returns the number removed.
    async fn cleanup_expired_chunked_uploads(&self, scope: &Scope) -> Result<u32>;
}
