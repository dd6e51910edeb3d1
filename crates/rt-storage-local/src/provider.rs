// SPDX-License-Identifier: MIT OR Apache-2.0
//! The POSIX filesystem [`Provider`] implementation (spec C8).

use crate::{chunked, meta, signed_url};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use rt_storage_core::{
    BoxAsyncRead, ChunkUploadResult, ChunkedUpload, ChunkedUploadSession, ChunkedUploadStatus,
    DownloadOptions, ListOptions, ListResult, Object, Provider, SignedUrlOptions, UploadOptions,
    path_guard,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Layout: `<base_path>/<bucket>/<key>` plus `<path>.meta` sidecars.
pub struct LocalProvider {
    base_path: PathBuf,
    base_url: String,
    signing_secret: Option<Vec<u8>>,
}

impl LocalProvider {
    /// Construct a new local backend rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
            signing_secret: None,
        }
    }

    /// Attach an HMAC signing secret, enabling signed-URL generation and
    /// validation.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        self.signing_secret = if secret.is_empty() { None } else { Some(secret) };
        self
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        path_guard::guard_path(&self.base_path, bucket, key)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        path_guard::validate_bucket_name(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    async fn read_meta(&self, object_path: &Path) -> meta::SidecarMeta {
        let sidecar = meta::sidecar_path(object_path);
        match tokio::fs::read_to_string(&sidecar).await {
            Ok(contents) => meta::parse(&contents),
            Err(_) => meta::SidecarMeta::default(),
        }
    }

    async fn write_meta(&self, object_path: &Path, m: &meta::SidecarMeta) -> Result<()> {
        let sidecar = meta::sidecar_path(object_path);
        tokio::fs::write(&sidecar, meta::render(m))
            .await
            .map_err(|e| RuntimeError::transport_failure(format!("failed to write sidecar: {e}")).with_source(e))
    }

    async fn object_meta_to_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<Object> {
        let fs_meta = tokio::fs::metadata(path).await.map_err(|_| {
            RuntimeError::not_found(format!("object not found: {bucket}/{key}"))
        })?;
        let sidecar = self.read_meta(path).await;

        let etag = match sidecar.etag {
            Some(etag) => etag,
            None => hash_file(path).await?,
        };

        let last_modified: DateTime<Utc> = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: fs_meta.len(),
            content_type: sidecar
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            last_modified,
            etag,
            metadata: sidecar.metadata,
        })
    }

    fn secret_or_unavailable(&self) -> Result<&[u8]> {
        self.signing_secret.as_deref().ok_or_else(|| {
            RuntimeError::capability_unavailable("no signing secret configured for this backend")
        })
    }
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn guarded<T>(scope: &Scope, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        () = scope.done() => Err(RuntimeError::cancelled("storage operation was cancelled")),
        result = fut => result,
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
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
        guarded(scope, async {
            let path = self.object_path(bucket, key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            }
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("failed to create object: {e}")).with_source(e))?;

            let mut hasher = Md5::new();
            let mut buf = vec![0u8; 64 * 1024];
            let mut total: u64 = 0;
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| RuntimeError::transport_failure(format!("failed to read upload body: {e}")).with_source(e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
                total += n as u64;
            }
            file.flush().await.map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;

            let etag = hex::encode(hasher.finalize());
            let sidecar = meta::SidecarMeta {
                content_type: opts.content_type.clone(),
                etag: Some(etag.clone()),
                cache_control: opts.cache_control.clone(),
                metadata: opts.metadata.clone(),
            };
            self.write_meta(&path, &sidecar).await?;

            Ok(Object {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: total,
                content_type: opts
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                last_modified: Utc::now(),
                etag,
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
        guarded(scope, async {
            let path = self.object_path(bucket, key)?;
            let object = self.object_meta_to_object(bucket, key, &path).await?;

            if let Some(etag) = &opts.if_none_match
                && etag == &object.etag
            {
                return Err(RuntimeError::invalid_input("not modified"));
            }
            if let Some(since) = opts.if_modified_since
                && object.last_modified <= since
            {
                return Err(RuntimeError::invalid_input("not modified"));
            }

            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|_| RuntimeError::not_found(format!("object not found: {bucket}/{key}")))?;

            match opts.range {
                None => {
                    let reader: BoxAsyncRead = Box::pin(file);
                    Ok((reader, object))
                }
                Some(range) => {
                    let (start, end) = range.clamp(object.size)?;
                    file.seek(std::io::SeekFrom::Start(start))
                        .await
                        .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
                    let len = end - start + 1;
                    let bounded: BoxAsyncRead = Box::pin(file.take(len));
                    let mut ranged_object = object;
                    ranged_object.size = len;
                    Ok((bounded, ranged_object))
                }
            }
        })
        .await
    }

    async fn delete(&self, scope: &Scope, bucket: &str, key: &str) -> Result<()> {
        guarded(scope, async {
            let path = self.object_path(bucket, key)?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|_| RuntimeError::not_found(format!("object not found: {bucket}/{key}")))?;
            let _ = tokio::fs::remove_file(meta::sidecar_path(&path)).await;
            Ok(())
        })
        .await
    }

    async fn exists(&self, scope: &Scope, bucket: &str, key: &str) -> Result<bool> {
        guarded(scope, async {
            let path = self.object_path(bucket, key)?;
            Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
        })
        .await
    }

    async fn get_object(&self, scope: &Scope, bucket: &str, key: &str) -> Result<Object> {
        guarded(scope, async {
            let path = self.object_path(bucket, key)?;
            self.object_meta_to_object(bucket, key, &path).await
        })
        .await
    }

    async fn list(&self, scope: &Scope, bucket: &str, opts: ListOptions) -> Result<ListResult> {
        guarded(scope, async {
            let dir = self.bucket_dir(bucket)?;
            if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                return Err(RuntimeError::not_found(format!("bucket not found: {bucket}")));
            }

            let dir_clone = dir.clone();
            let prefix = opts.prefix.clone();
            let delimiter = opts.delimiter.clone();
            let max_keys = opts.max_keys;

            tokio::task::spawn_blocking(move || list_blocking(&dir_clone, prefix, delimiter, max_keys))
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?
        })
        .await
        .map(|mut result| {
            for obj in &mut result.objects {
                obj.bucket = bucket.to_string();
            }
            result
        })
    }

    async fn create_bucket(&self, scope: &Scope, bucket: &str) -> Result<()> {
        guarded(scope, async {
            let dir = self.bucket_dir(bucket)?;
            if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                return Err(RuntimeError::already_exists(format!("bucket already exists: {bucket}")));
            }
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))
        })
        .await
    }

    async fn delete_bucket(&self, scope: &Scope, bucket: &str) -> Result<()> {
        guarded(scope, async {
            let dir = self.bucket_dir(bucket)?;
            if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                return Err(RuntimeError::not_found(format!("bucket not found: {bucket}")));
            }

            let mut has_objects = false;
            let mut entries = walkdir::WalkDir::new(&dir).into_iter();
            while let Some(entry) = entries.next() {
                let entry = entry.map_err(|e| RuntimeError::transport_failure(e.to_string()))?;
                if entry.file_type().is_file() {
                    let name = entry.file_name().to_string_lossy();
                    if !name.ends_with(".meta") {
                        has_objects = true;
                        break;
                    }
                }
            }
            if has_objects {
                return Err(RuntimeError::not_empty(format!("bucket not empty: {bucket}")));
            }
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))
        })
        .await
    }

    async fn bucket_exists(&self, scope: &Scope, bucket: &str) -> Result<bool> {
        guarded(scope, async {
            let dir = self.bucket_dir(bucket)?;
            Ok(tokio::fs::try_exists(&dir).await.unwrap_or(false))
        })
        .await
    }

    async fn list_buckets(&self, scope: &Scope) -> Result<Vec<String>> {
        guarded(scope, async {
            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.base_path)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?
            {
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name != chunked::CHUNKED_DIR {
                        names.push(name);
                    }
                }
            }
            names.sort();
            Ok(names)
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
        guarded(scope, async {
            let secret = self.secret_or_unavailable()?;
            let expires_at = (Utc::now() + chrono::Duration::from_std(opts.expires_in).unwrap_or_default())
                .timestamp();
            let token = signed_url::generate(secret, bucket, key, &opts.method, expires_at, opts.transform)?;
            Ok(signed_url::build_url(&self.base_url, &token))
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
        guarded(scope, async {
            let src_path = self.object_path(src_bucket, src_key)?;
            let dst_path = self.object_path(dst_bucket, dst_key)?;
            if let Some(parent) = dst_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            }
            tokio::fs::copy(&src_path, &dst_path)
                .await
                .map_err(|_| RuntimeError::not_found(format!("object not found: {src_bucket}/{src_key}")))?;

            let src_sidecar = meta::sidecar_path(&src_path);
            if tokio::fs::try_exists(&src_sidecar).await.unwrap_or(false) {
                let _ = tokio::fs::copy(&src_sidecar, meta::sidecar_path(&dst_path)).await;
            }

            self.object_meta_to_object(dst_bucket, dst_key, &dst_path).await
        })
        .await
    }

    async fn health(&self, scope: &Scope) -> Result<()> {
        guarded(scope, async {
            tokio::fs::metadata(&self.base_path)
                .await
                .map_err(|e| RuntimeError::transport_failure(format!("base path unavailable: {e}")).with_source(e))?;
            let probe = self.base_path.join(".health_check");
            tokio::fs::write(&probe, b"ok")
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            tokio::fs::remove_file(&probe)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))
        })
        .await
    }
}

fn list_blocking(
    dir: &Path,
    prefix: Option<String>,
    delimiter: Option<String>,
    max_keys: usize,
) -> Result<ListResult> {
    let mut objects = Vec::new();
    let mut common_prefixes = std::collections::BTreeSet::new();
    let mut is_truncated = false;

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RuntimeError::transport_failure(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        if rel.ends_with(".meta") {
            continue;
        }
        if let Some(p) = &prefix
            && !rel.starts_with(p.as_str())
        {
            continue;
        }

        if let Some(delim) = &delimiter {
            let remainder = prefix.as_deref().map_or(rel.as_str(), |p| &rel[p.len()..]);
            if let Some(idx) = remainder.find(delim.as_str()) {
                let prefix_len = prefix.as_deref().map_or(0, str::len) + idx + delim.len();
                common_prefixes.insert(rel[..prefix_len].to_string());
                continue;
            }
        }

        if objects.len() >= max_keys {
            is_truncated = true;
            break;
        }

        let fs_meta = entry
            .metadata()
            .map_err(|e| RuntimeError::transport_failure(e.to_string()))?;
        let last_modified = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        objects.push(Object {
            bucket: String::new(),
            key: rel,
            size: fs_meta.len(),
            content_type: "application/octet-stream".to_string(),
            last_modified,
            etag: String::new(),
            metadata: Default::default(),
        });
    }

    Ok(ListResult {
        objects,
        common_prefixes: common_prefixes.into_iter().collect(),
        is_truncated,
    })
}

#[async_trait]
impl ChunkedUpload for LocalProvider {
    async fn init_chunked_upload(
        &self,
        scope: &Scope,
        bucket: &str,
        key: &str,
        total_size: u64,
        chunk_size: u64,
        opts: UploadOptions,
    ) -> Result<ChunkedUploadSession> {
        guarded(scope, async {
            path_guard::validate_bucket_name(bucket)?;
            let session = chunked::new_session(
                bucket,
                key,
                total_size,
                chunk_size,
                opts.content_type,
                opts.metadata,
                opts.cache_control,
            );
            let dir = chunked::session_dir(&self.base_path, &session.upload_id);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            chunked::write_session(&dir, &session).await?;
            Ok(session)
        })
        .await
    }

    async fn upload_chunk(
        &self,
        scope: &Scope,
        upload_id: &str,
        index: u32,
        reader: BoxAsyncRead,
        _size: u64,
    ) -> Result<ChunkUploadResult> {
        guarded(scope, async {
            let dir = chunked::session_dir(&self.base_path, upload_id);
            let session = chunked::read_session(&dir).await?;
            if session.status != ChunkedUploadStatus::Active {
                return Err(RuntimeError::invalid_input("chunked upload is not active"));
            }
            if index >= session.total_chunks {
                return Err(RuntimeError::invalid_input(format!(
                    "chunk index {index} out of range (0..{})",
                    session.total_chunks
                )));
            }
            let (etag, bytes) = chunked::write_chunk(&dir, index, reader).await?;
            Ok(ChunkUploadResult { index, etag, bytes })
        })
        .await
    }

    async fn complete_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<Object> {
        guarded(scope, async {
            let dir = chunked::session_dir(&self.base_path, upload_id);
            let session = chunked::read_session(&dir).await?;

            let dest = self.object_path(&session.bucket, &session.key)?;
            let (etag, total) = chunked::concatenate_chunks(&dir, session.total_chunks, &dest).await?;

            let sidecar = meta::SidecarMeta {
                content_type: session.content_type.clone(),
                etag: Some(etag.clone()),
                cache_control: session.cache_control.clone(),
                metadata: session.metadata.clone(),
            };
            self.write_meta(&dest, &sidecar).await?;
            chunked::remove_session_dir(&dir).await?;

            Ok(Object {
                bucket: session.bucket,
                key: session.key,
                size: total,
                content_type: sidecar
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                last_modified: Utc::now(),
                etag,
                metadata: sidecar.metadata,
            })
        })
        .await
    }

    async fn abort_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<()> {
        guarded(scope, async {
            let dir = chunked::session_dir(&self.base_path, upload_id);
            chunked::remove_session_dir(&dir).await
        })
        .await
    }

    async fn get_chunked_upload(&self, scope: &Scope, upload_id: &str) -> Result<ChunkedUploadSession> {
        guarded(scope, async {
            let dir = chunked::session_dir(&self.base_path, upload_id);
            let mut session = chunked::read_session(&dir).await?;
            chunked::refresh_completed_chunks(&dir, &mut session).await?;
            Ok(session)
        })
        .await
    }

    async fn cleanup_expired_chunked_uploads(&self, scope: &Scope) -> Result<u32> {
        guarded(scope, async {
            let chunked_root = self.base_path.join(chunked::CHUNKED_DIR);
            if !tokio::fs::try_exists(&chunked_root).await.unwrap_or(false) {
                return Ok(0);
            }
            let mut removed = 0u32;
            let mut entries = tokio::fs::read_dir(&chunked_root)
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
            let now = Utc::now();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?
            {
                let dir = entry.path();
                match chunked::read_session(&dir).await {
                    Ok(session) => {
                        if now > session.expires_at {
                            if let Err(e) = chunked::remove_session_dir(&dir).await {
                                tracing::warn!(error = %e, upload_id = %session.upload_id, "failed to sweep expired chunked upload");
                            } else {
                                removed += 1;
                            }
                        }
                    }
                    Err(_) => {
                        let age_ok = entry
                            .metadata()
                            .await
                            .ok()
                            .and_then(|m| m.created().ok())
                            .map(DateTime::<Utc>::from)
                            .map(|created| (now - created).num_seconds() > chunked::ORPHAN_SWEEP_AGE_SECS)
                            .unwrap_or(false);
                        if age_ok {
                            if chunked::remove_session_dir(&dir).await.is_ok() {
                                removed += 1;
                            }
                        }
                    }
                }
            }
            Ok(removed)
        })
        .await
    }
}

impl LocalProvider {
    /// Verify a signed URL token, returning only `(bucket, key, method)`
    /// (spec §4.8 "Two validation entry points").
    pub fn validate_signed_url_basic(&self, token: &str) -> Result<(String, String, String)> {
        let secret = self.secret_or_unavailable()?;
        let record = signed_url::validate(secret, token, Utc::now().timestamp())?;
        Ok((record.bucket, record.key, record.method))
    }

    /// Verify a signed URL token, returning the full record including any
    /// embedded transform params.
    pub fn validate_signed_url_full(&self, token: &str) -> Result<signed_url::SignedUrlRecord> {
        let secret = self.secret_or_unavailable()?;
        signed_url::validate(secret, token, Utc::now().timestamp())
    }
}
