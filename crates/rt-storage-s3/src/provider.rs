// SPDX-License-Identifier: MIT OR Apache-2.0
//! The S3-compatible [`Provider`] implementation (spec C9).

use crate::sessions::SessionRegistry;
use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use rt_storage_core::{
    BoxAsyncRead, ChunkUploadResult, ChunkedUpload, ChunkedUploadSession, DownloadOptions,
    ListOptions, ListResult, Object, Provider, SignedUrlOptions, UploadOptions,
};
use std::collections::BTreeMap;
use tokio::io::AsyncReadExt;

/// `Provider`/`ChunkedUpload` implementation backed by an S3-compatible
/// object store.
pub struct S3Provider {
    client: Client,
    sessions: SessionRegistry,
}

impl S3Provider {
    /// Wrap an already-configured `aws_sdk_s3::Client`.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            sessions: SessionRegistry::new(),
        }
    }

    async fn guarded<T>(&self, scope: &Scope, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = scope.done() => Err(RuntimeError::cancelled("storage operation was cancelled")),
            result = fut => result,
        }
    }
}

fn guess_content_type(head_content_type: Option<&str>) -> String {
    head_content_type
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn metadata_to_map(metadata: Option<&std::collections::HashMap<String, String>>) -> BTreeMap<String, String> {
    metadata
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn upload(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        mut reader: BoxAsyncRead,
        _size: u64,
        opts: UploadOptions,
    ) -> Result<Object> {
        self.guarded(scope, async {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("failed to read upload body: {e}")).with_source(e))?;
            let len = buf.len() as u64;

            let mut request = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(buf));
            if let Some(ct) = &opts.content_type {
                request = request.content_type(ct);
            }
            if let Some(cc) = &opts.cache_control {
                request = request.cache_control(cc);
            }
            for (k, v) in &opts.metadata {
                request = request.metadata(k, v);
            }

            let output = request
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 put_object failed: {e}")))?;

            Ok(Object {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: len,
                content_type: opts
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                last_modified: Utc::now(),
                etag: output.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                metadata: opts.metadata,
            })
        })
        .await
    }

    async fn download(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        opts: DownloadOptions,
    ) -> Result<(BoxAsyncRead, Object)> {
        self.guarded(scope, async {
            let mut request = self.client.get_object().bucket(bucket).key(key);
            if let Some(range) = opts.range {
                let end = range.end.map(|e| e.to_string()).unwrap_or_default();
                request = request.range(format!("bytes={}-{}", range.start, end));
            }
            if let Some(etag) = &opts.if_none_match {
                request = request.if_none_match(etag);
            }
            if let Some(since) = opts.if_modified_since {
                let since = aws_sdk_s3::primitives::DateTime::from_secs(since.timestamp());
                request = request.if_modified_since(since);
            }

            let output = request.send().await.map_err(|e| match &e {
                SdkError::ServiceError(ctx) if matches!(ctx.err(), GetObjectError::NoSuchKey(_)) => {
                    RuntimeError::not_found(format!("object not found: {bucket}/{key}"))
                }
                other => RuntimeError::transport_failure(format!("s3 get_object failed: {other}")),
            })?;

            let size = output.content_length().unwrap_or(0).max(0) as u64;
            let content_type = guess_content_type(output.content_type());
            let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
            let last_modified = output
                .last_modified()
                .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                .unwrap_or_else(Utc::now);
            let metadata = metadata_to_map(output.metadata());

            let reader: BoxAsyncRead = Box::pin(output.body.into_async_read());

            Ok((
                reader,
                Object {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    size,
                    content_type,
                    last_modified,
                    etag,
                    metadata,
                },
            ))
        })
        .await
    }

    async fn delete(&self, scope: &Scope, bucket: &str, key: &str) -> Result<()> {
        self.guarded(scope, async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 delete_object failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, scope: &Scope, bucket: &str, key: &str) -> Result<bool> {
        self.guarded(scope, async {
            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(SdkError::ServiceError(ctx)) => match ctx.err() {
                    HeadObjectError::NotFound(_) => Ok(false),
                    other => Err(RuntimeError::transport_failure(format!("s3 head_object failed: {other}"))),
                },
                Err(e) => Err(RuntimeError::transport_failure(format!("s3 head_object failed: {e}"))),
            }
        })
        .await
    }

    async fn get_object(&self, scope: &Scope, bucket: &str, key: &str) -> Result<Object> {
        self.guarded(scope, async {
            let output = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| match &e {
                    SdkError::ServiceError(ctx) if matches!(ctx.err(), HeadObjectError::NotFound(_)) => {
                        RuntimeError::not_found(format!("object not found: {bucket}/{key}"))
                    }
                    other => RuntimeError::transport_failure(format!("s3 head_object failed: {other}")),
                })?;

            let last_modified = output
                .last_modified()
                .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                .unwrap_or_else(Utc::now);

            Ok(Object {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
                content_type: guess_content_type(output.content_type()),
                last_modified,
                etag: output.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                metadata: metadata_to_map(output.metadata()),
            })
        })
        .await
    }

    async fn list(&self, scope: &Scope, bucket: &str, opts: ListOptions) -> Result<ListResult> {
        self.guarded(scope, async {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .max_keys(opts.max_keys as i32);
            if let Some(prefix) = &opts.prefix {
                request = request.prefix(prefix);
            }
            if let Some(delim) = &opts.delimiter {
                request = request.delimiter(delim);
            }

            let output = request
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 list_objects_v2 failed: {e}")))?;

            let objects = output
                .contents()
                .iter()
                .map(|o| Object {
                    bucket: bucket.to_string(),
                    key: o.key().unwrap_or_default().to_string(),
                    size: o.size().unwrap_or(0).max(0) as u64,
                    content_type: "application/octet-stream".to_string(),
                    last_modified: o
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
                        .unwrap_or_else(Utc::now),
                    etag: o.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                    metadata: BTreeMap::new(),
                })
                .collect();

            let common_prefixes = output
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect();

            Ok(ListResult {
                objects,
                common_prefixes,
                is_truncated: output.is_truncated().unwrap_or(false),
            })
        })
        .await
    }

    async fn create_bucket(&self, scope: &Scope, bucket: &str) -> Result<()> {
        self.guarded(scope, async {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| {
                    if e.code() == Some("BucketAlreadyOwnedByYou") || e.code() == Some("BucketAlreadyExists") {
                        RuntimeError::already_exists(format!("bucket already exists: {bucket}"))
                    } else {
                        RuntimeError::transport_failure(format!("s3 create_bucket failed: {e}"))
                    }
                })?;
            Ok(())
        })
        .await
    }

    async fn delete_bucket(&self, scope: &Scope, bucket: &str) -> Result<()> {
        self.guarded(scope, async {
            self.client.delete_bucket().bucket(bucket).send().await.map_err(|e| {
                if e.code() == Some("BucketNotEmpty") {
                    RuntimeError::not_empty(format!("bucket not empty: {bucket}"))
                } else {
                    RuntimeError::transport_failure(format!("s3 delete_bucket failed: {e}"))
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn bucket_exists(&self, scope: &Scope, bucket: &str) -> Result<bool> {
        self.guarded(scope, async {
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(true),
                Err(SdkError::ServiceError(ctx)) => match ctx.err() {
                    HeadBucketError::NotFound(_) => Ok(false),
                    other => Err(RuntimeError::transport_failure(format!("s3 head_bucket failed: {other}"))),
                },
                Err(e) => Err(RuntimeError::transport_failure(format!("s3 head_bucket failed: {e}"))),
            }
        })
        .await
    }

    async fn list_buckets(&self, scope: &Scope) -> Result<Vec<String>> {
        self.guarded(scope, async {
            let output = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 list_buckets failed: {e}")))?;
            Ok(output
                .buckets()
                .iter()
                .filter_map(|b| b.name().map(str::to_string))
                .collect())
        })
        .await
    }

    async fn generate_signed_url(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        opts: SignedUrlOptions,
    ) -> Result<String> {
        self.guarded(scope, async {
            let presigning = PresigningConfig::expires_in(opts.expires_in)
                .map_err(|e| RuntimeError::invalid_input(format!("invalid presigning expiry: {e}")))?;

            let uri = match opts.method.to_ascii_uppercase().as_str() {
                "PUT" => {
                    self.client
                        .put_object()
                        .bucket(bucket)
                        .key(key)
                        .presigned(presigning)
                        .await
                        .map_err(|e| RuntimeError::transport_failure(format!("s3 presign put failed: {e}")))?
                        .uri()
                        .to_string()
                }
                _ => {
                    self.client
                        .get_object()
                        .bucket(bucket)
                        .key(key)
                        .presigned(presigning)
                        .await
                        .map_err(|e| RuntimeError::transport_failure(format!("s3 presign get failed: {e}")))?
                        .uri()
                        .to_string()
                }
            };
            Ok(uri)
        })
        .await
    }

    async fn copy(
        &self,
        scope: &Scope,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object> {
        self.guarded(scope, async {
            let source = format!(
                "{}/{}",
                src_bucket,
                urlencoding_path(src_key)
            );
            self.client
                .copy_object()
                .bucket(dst_bucket)
                .key(dst_key)
                .copy_source(source)
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 copy_object failed: {e}")))?;

            self.get_object(scope, dst_bucket, dst_key).await
        })
        .await
    }

    async fn health(&self, scope: &Scope) -> Result<()> {
        self.guarded(scope, async {
            self.client
                .list_buckets()
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 health check failed: {e}")))?;
            Ok(())
        })
        .await
    }
}

fn urlencoding_path(key: &str) -> String {
    key.split('/')
        .map(|segment| {
            let mut out = String::with_capacity(segment.len());
            for b in segment.bytes() {
                match b {
                    b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                        out.push(b as char);
                    }
                    _ => out.push_str(&format!("%{b:02X}")),
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoding_path_preserves_segments_and_escapes_reserved_bytes() {
        assert_eq!(urlencoding_path("a/b c/d.txt"), "a/b%20c/d.txt");
    }

    #[test]
    fn urlencoding_path_leaves_unreserved_characters_untouched() {
        assert_eq!(urlencoding_path("abc-123_DEF.ext~"), "abc-123_DEF.ext~");
    }
}

#[async_trait]
impl ChunkedUpload for S3Provider {
    async fn init_chunked_upload(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        total_size: u64,
        chunk_size: u64,
        opts: UploadOptions,
    ) -> Result<ChunkedUploadSession> {
        self.guarded(scope, async {
            let mut request = self.client.create_multipart_upload().bucket(bucket).key(key);
            if let Some(ct) = &opts.content_type {
                request = request.content_type(ct);
            }
            if let Some(cc) = &opts.cache_control {
                request = request.cache_control(cc);
            }
            for (k, v) in &opts.metadata {
                request = request.metadata(k, v);
            }

            let output = request
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 create_multipart_upload failed: {e}")))?;
            let upload_id = output
                .upload_id()
                .ok_or_else(|| RuntimeError::transport_failure("s3 create_multipart_upload returned no upload id"))?
                .to_string();

            let session = crate::sessions::new_session(
                bucket,
                key,
                total_size,
                chunk_size,
                opts.content_type,
                opts.metadata,
                opts.cache_control,
                upload_id,
            );
            self.sessions.insert(session.clone());
            Ok(session)
        })
        .await
    }

    async fn upload_chunk(
        &self,
        scope: &Scope,
        upload_id: &str,
        index: u32,
        mut reader: BoxAsyncRead,
        _size: u64,
    ) -> Result<ChunkUploadResult> {
        self.guarded(scope, async {
            let session = self
                .sessions
                .get(upload_id)
                .ok_or_else(|| RuntimeError::not_found("chunked upload session not found"))?;

            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("failed to read chunk body: {e}")).with_source(e))?;
            let bytes = buf.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&session.bucket)
                .key(&session.key)
                .upload_id(upload_id)
                .part_number((index + 1) as i32)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 upload_part failed: {e}")))?;

            let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
            self.sessions.record_part(upload_id, index, etag.clone());

            Ok(ChunkUploadResult { index, etag, bytes })
        })
        .await
    }

    async fn complete_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<Object> {
        self.guarded(scope, async {
            let session = self
                .sessions
                .get(upload_id)
                .ok_or_else(|| RuntimeError::not_found("chunked upload session not found"))?;

            let parts = session
                .s3_part_etags
                .iter()
                .map(|(index, etag)| {
                    CompletedPart::builder()
                        .part_number((*index + 1) as i32)
                        .e_tag(etag.clone())
                        .build()
                })
                .collect::<Vec<_>>();

            self.client
                .complete_multipart_upload()
                .bucket(&session.bucket)
                .key(&session.key)
                .upload_id(upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 complete_multipart_upload failed: {e}")))?;

            self.sessions.remove(upload_id);
            self.get_object(scope, &session.bucket, &session.key).await
        })
        .await
    }

    async fn abort_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<()> {
        self.guarded(scope, async {
            if let Some(session) = self.sessions.get(upload_id) {
                self.client
                    .abort_multipart_upload()
                    .bucket(&session.bucket)
                    .key(&session.key)
                    .upload_id(upload_id)
                    .send()
                    .await
                    .map_err(|e| RuntimeError::transport_failure(format!("s3 abort_multipart_upload failed: {e}")))?;
            }
            self.sessions.remove(upload_id);
            Ok(())
        })
        .await
    }

    async fn get_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<ChunkedUploadSession> {
        self.guarded(scope, async {
            let session = self
                .sessions
                .get(upload_id)
                .ok_or_else(|| RuntimeError::not_found("chunked upload session not found"))?;

            let output = self
                .client
                .list_parts()
                .bucket(&session.bucket)
                .key(&session.key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("s3 list_parts failed: {e}")))?;

            for part in output.parts() {
                if let (Some(part_number), Some(etag)) = (part.part_number(), part.e_tag()) {
                    self.sessions.record_part(
                        upload_id,
                        (part_number - 1) as u32,
                        etag.trim_matches('"').to_string(),
                    );
                }
            }

            self.sessions
                .get(upload_id)
                .ok_or_else(|| RuntimeError::not_found("chunked upload session not found"))
        })
        .await
    }

    async fn cleanup_expired_chunked_uploads(&self, scope: &Scope) -> Result<u32> {
        self.guarded(scope, async {
            let expired = self.sessions.sweep_expired();
            let mut removed = 0u32;
            for (upload_id, bucket, key) in expired {
                let result = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                match result {
                    Ok(_) => removed += 1,
                    Err(e) => tracing::warn!(error = %e, upload_id, "failed to abort expired multipart upload"),
                }
            }
            Ok(removed)
        })
        .await
    }
}

/// Remove multipart uploads the S3 bucket itself still has open but which
/// this process lost track of (e.g. after a restart) — a second-chance
/// sweep distinct from [`ChunkedUpload::cleanup_expired_chunked_uploads`],
/// which only acts on sessions this process remembers.
pub async fn sweep_orphaned_uploads(client: &Client, bucket: &str, older_than: chrono::Duration) -> Result<u32> {
    let output = client
        .list_multipart_uploads()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| RuntimeError::transport_failure(format!("s3 list_multipart_uploads failed: {e}")))?;

    let cutoff = Utc::now() - older_than;
    let mut removed = 0u32;
    for upload in output.uploads() {
        let Some(upload_id) = upload.upload_id() else {
            continue;
        };
        let Some(key) = upload.key() else { continue };
        let initiated = upload
            .initiated()
            .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
            .unwrap_or_else(Utc::now);
        if initiated > cutoff {
            continue;
        }
        let result = client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        match result {
            Ok(_) => removed += 1,
            Err(e) => tracing::warn!(error = %e, upload_id, "failed to abort orphaned multipart upload"),
        }
    }
    Ok(removed)
}
