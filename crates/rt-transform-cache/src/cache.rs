// SPDX-License-Identifier: MIT OR Apache-2.0
//! The self-managed `_transform_cache` bucket (spec §4.11).
//!
//! [`TransformCache`] decorates any [`Provider`] — it is not itself a
//! provider. All index mutations are serialized by a single mutex; the
//! actual payload/meta upload and download calls happen outside the lock
//! (spec §5 "downloads/uploads release the lock").

use crate::index::CacheIndex;
use crate::meta::CacheEntryMeta;
use chrono::Utc;
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use rt_storage_core::{BoxAsyncRead, Provider, UploadOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

/// Target load factor eviction drains down to, leaving headroom for the
/// entry about to be inserted (spec §4.11 "evict... until `currentSize
/// <= 0.8*maxSize - newSize`").
const EVICTION_LOAD_FACTOR: f64 = 0.8;

/// Configuration for a [`TransformCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Bucket the cache lives in (spec default `_transform_cache`).
    pub bucket: String,
    /// Entry time-to-live (spec default 24h).
    pub ttl: Duration,
    /// Maximum total cache size in bytes (spec default 1 GiB).
    pub max_total_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket: "_transform_cache".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            max_total_size: 1024 * 1024 * 1024,
        }
    }
}

fn meta_key(key: &str) -> String {
    format!("{key}.meta")
}

/// A self-managed LRU/TTL cache bucket, backed by any [`Provider`].
pub struct TransformCache<P: Provider> {
    provider: Arc<P>,
    config: CacheConfig,
    index: Mutex<CacheIndex>,
}

impl<P: Provider> TransformCache<P> {
    /// Construct a cache with an empty in-memory index. Call
    /// [`Self::warm_index`] once at startup to populate it from the
    /// backing bucket's existing contents (spec §4.11 "on startup, walk
    /// the bucket, populate in-memory index").
    #[must_use]
    pub fn new(provider: Arc<P>, config: CacheConfig) -> Self {
        Self {
            provider,
            config,
            index: Mutex::new(CacheIndex::new()),
        }
    }

    /// Walk the cache bucket and populate the in-memory index from
    /// existing `<key>.meta` sidecars. Idempotent; safe to call once at
    /// startup before serving traffic.
    pub async fn warm_index(&self, scope: &Scope) -> Result<()> {
        self.provider
            .create_bucket(scope, &self.config.bucket)
            .await
            .or_else(|e| {
                if e.kind() == rt_error::ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(e)
                }
            })?;

        let list = self
            .provider
            .list(
                scope,
                &self.config.bucket,
                rt_storage_core::ListOptions {
                    prefix: None,
                    delimiter: None,
                    max_keys: usize::MAX,
                },
            )
            .await?;

        let mut index = self.index.lock().await;
        for obj in list.objects {
            let Some(key) = obj.key.strip_suffix(".meta") else {
                continue;
            };
            let (mut reader, meta_obj) = self
                .provider
                .download(
                    scope,
                    &self.config.bucket,
                    &obj.key,
                    rt_storage_core::DownloadOptions::default(),
                )
                .await?;
            let mut bytes = Vec::with_capacity(meta_obj.size as usize);
            reader
                .read_to_end(&mut bytes)
                .await
                .map_err(|e| RuntimeError::transport_failure("reading cache meta").with_source(e))?;
            let Ok(meta) = CacheEntryMeta::from_json(&bytes) else {
                continue;
            };
            index.insert(key.to_string(), meta.size, meta.access_time);
        }
        Ok(())
    }

    /// Look up a cached transform. A miss returns `Ok(None)`; an entry
    /// past its TTL is evicted and counted as a miss.
    pub async fn get(&self, scope: &Scope, key: &str) -> Result<Option<(Vec<u8>, String)>> {
        let now = Utc::now();
        {
            let mut index = self.index.lock().await;
            let Some(entry) = index.get(key) else {
                return Ok(None);
            };
            if now.signed_duration_since(entry.access_time).num_seconds()
                > self.config.ttl.as_secs() as i64
            {
                index.remove(key);
                drop(index);
                let _ = self.delete_entry(scope, key).await;
                return Ok(None);
            }
        }

        let (mut payload_reader, _) = match self
            .provider
            .download(
                scope,
                &self.config.bucket,
                key,
                rt_storage_core::DownloadOptions::default(),
            )
            .await
        {
            Ok(v) => v,
            Err(e) if e.kind() == rt_error::ErrorKind::NotFound => {
                self.index.lock().await.remove(key);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let (mut meta_reader, _) = self
            .provider
            .download(
                scope,
                &self.config.bucket,
                &meta_key(key),
                rt_storage_core::DownloadOptions::default(),
            )
            .await?;

        let mut payload = Vec::new();
        payload_reader
            .read_to_end(&mut payload)
            .await
            .map_err(|e| RuntimeError::transport_failure("reading cached payload").with_source(e))?;
        let mut meta_bytes = Vec::new();
        meta_reader
            .read_to_end(&mut meta_bytes)
            .await
            .map_err(|e| RuntimeError::transport_failure("reading cache meta").with_source(e))?;
        let meta = CacheEntryMeta::from_json(&meta_bytes)
            .map_err(|e| RuntimeError::protocol_violation("corrupt cache meta").with_source(e))?;

        self.index.lock().await.touch(key, now);

        Ok(Some((payload, meta.content_type)))
    }

    /// Insert or replace a cached transform, evicting LRU entries first
    /// if needed to stay within [`CacheConfig::max_total_size`].
    pub async fn set(
        &self,
        scope: &Scope,
        key: &str,
        source_key: &str,
        content_type: &str,
        payload: &[u8],
    ) -> Result<()> {
        let new_size = payload.len() as u64;
        let evicted = {
            let mut index = self.index.lock().await;
            let target_cap =
                (self.config.max_total_size as f64 * EVICTION_LOAD_FACTOR) as u64;
            let target = target_cap.saturating_sub(new_size);
            if index.current_size() + new_size > self.config.max_total_size {
                index.evict_until(target)
            } else {
                Vec::new()
            }
        };
        for evicted_key in evicted {
            let _ = self.delete_entry(scope, &evicted_key).await;
        }

        let now = Utc::now();
        let body: BoxAsyncRead = Box::pin(std::io::Cursor::new(payload.to_vec()));
        self.provider
            .upload(
                scope,
                &self.config.bucket,
                key,
                body,
                new_size,
                UploadOptions {
                    content_type: Some(content_type.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let meta = CacheEntryMeta {
            content_type: content_type.to_string(),
            size: new_size,
            source_key: source_key.to_string(),
            access_time: now,
            created_at: now,
        };
        let meta_body: BoxAsyncRead = Box::pin(std::io::Cursor::new(meta.to_json()));
        if let Err(e) = self
            .provider
            .upload(
                scope,
                &self.config.bucket,
                &meta_key(key),
                meta_body,
                meta.to_json().len() as u64,
                UploadOptions::default(),
            )
            .await
        {
            let _ = self.provider.delete(scope, &self.config.bucket, key).await;
            return Err(e);
        }

        self.index.lock().await.insert(key.to_string(), new_size, now);
        Ok(())
    }

    /// Remove every entry whose `source_key` is `"<bucket>/<key>"`.
    pub async fn invalidate(&self, scope: &Scope, bucket: &str, key: &str) -> Result<()> {
        let target = format!("{bucket}/{key}");
        let list = self
            .provider
            .list(
                scope,
                &self.config.bucket,
                rt_storage_core::ListOptions {
                    prefix: None,
                    delimiter: None,
                    max_keys: usize::MAX,
                },
            )
            .await?;

        for obj in list.objects {
            let Some(cache_key) = obj.key.strip_suffix(".meta") else {
                continue;
            };
            let (mut reader, meta_obj) = self
                .provider
                .download(
                    scope,
                    &self.config.bucket,
                    &obj.key,
                    rt_storage_core::DownloadOptions::default(),
                )
                .await?;
            let mut bytes = Vec::with_capacity(meta_obj.size as usize);
            reader
                .read_to_end(&mut bytes)
                .await
                .map_err(|e| RuntimeError::transport_failure("reading cache meta").with_source(e))?;
            let Ok(meta) = CacheEntryMeta::from_json(&bytes) else {
                continue;
            };
            if meta.source_key == target {
                self.delete_entry(scope, cache_key).await?;
                self.index.lock().await.remove(cache_key);
            }
        }
        Ok(())
    }

    /// Evict every entry older than the configured TTL.
    pub async fn cleanup(&self, scope: &Scope) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.ttl).unwrap_or_default();
        let stale = {
            let index = self.index.lock().await;
            index.stale_keys(cutoff)
        };
        for key in &stale {
            self.delete_entry(scope, key).await?;
            self.index.lock().await.remove(key);
        }
        Ok(stale.len() as u32)
    }

    /// Current total cache size in bytes, as tracked by the in-memory index.
    pub async fn current_size(&self) -> u64 {
        self.index.lock().await.current_size()
    }

    async fn delete_entry(&self, scope: &Scope, key: &str) -> Result<()> {
        let _ = self.provider.delete(scope, &self.config.bucket, key).await;
        let _ = self
            .provider
            .delete(scope, &self.config.bucket, &meta_key(key))
            .await;
        Ok(())
    }
}
