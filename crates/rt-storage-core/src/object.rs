// SPDX-License-Identifier: MIT OR Apache-2.0
//! The storage data model shared by every backend (spec §3 `Object`,
//! `ChunkedUploadSession`; spec §4.7 option structs).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored blob's metadata (spec §3 `Object`).
///
/// Invariant: `(bucket, key)` uniquely identifies an object; `etag` equals
/// the MD5 of the payload for single-part uploads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Object {
    /// Bucket (namespace) the object lives in.
    pub bucket: String,
    /// Slash-delimited key within the bucket.
    pub key: String,
    /// Payload size in bytes.
    pub size: u64,
    /// MIME content type.
    pub content_type: String,
    /// Last-modified timestamp.
    pub last_modified: DateTime<Utc>,
    /// Entity tag; MD5 hex digest for single-part uploads.
    pub etag: String,
    /// Arbitrary user metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Options accepted by [`Provider::upload`](crate::Provider::upload).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UploadOptions {
    /// Content type to store; backends default to `application/octet-stream`
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Arbitrary user metadata to persist alongside the object.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Cache-Control header value to associate with the object, where the
    /// backend supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
}

/// An inclusive byte range, parsed from an HTTP `Range: bytes=a-b` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ByteRange {
    /// Start offset (inclusive). Negative ranges are normalized to `0`
    /// before this type is constructed.
    pub start: u64,
    /// End offset (inclusive), if bounded. `None` means "to end of object".
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a `Range: bytes=a-b` header value's `a-b` portion (without the
    /// `bytes=` prefix). Returns `None` if the syntax is not a simple
    /// single range.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim().strip_prefix("bytes=").unwrap_or(spec.trim());
        let (start_str, end_str) = spec.split_once('-')?;
        if start_str.is_empty() {
            // suffix range "-N": last N bytes; represented as start=None
            // sentinel via end_str only, handled by caller with object size.
            return None;
        }
        let start: i64 = start_str.parse().ok()?;
        let end = if end_str.is_empty() {
            None
        } else {
            Some(end_str.parse::<u64>().ok()?)
        };
        Some(Self {
            start: start.max(0) as u64,
            end,
        })
    }

    /// Clamp this range against an object of `size` bytes, per spec §4.8:
    /// "negative a -> 0; b >= size -> size-1; invalid returns not satisfiable".
    pub fn clamp(self, size: u64) -> Result<(u64, u64), rt_error::RuntimeError> {
        if size == 0 || self.start >= size {
            return Err(rt_error::RuntimeError::invalid_input(
                "range not satisfiable",
            ));
        }
        let end = match self.end {
            Some(e) if e >= size => size - 1,
            Some(e) => e,
            None => size - 1,
        };
        if end < self.start {
            return Err(rt_error::RuntimeError::invalid_input(
                "range not satisfiable",
            ));
        }
        Ok((self.start, end))
    }
}

/// Options accepted by [`Provider::download`](crate::Provider::download).
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Byte range to fetch, if any.
    pub range: Option<ByteRange>,
    /// Conditional GET: only return data if the stored etag differs.
    pub if_none_match: Option<String>,
    /// Conditional GET: only return data if modified after this time.
    pub if_modified_since: Option<DateTime<Utc>>,
}

/// Options accepted by [`Provider::list`](crate::Provider::list).
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Restrict results to keys starting with this prefix.
    pub prefix: Option<String>,
    /// Delimiter used to group keys into common prefixes (directory-style
    /// listing), typically `/`.
    pub delimiter: Option<String>,
    /// Maximum objects returned (spec default 1000).
    pub max_keys: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            delimiter: None,
            max_keys: 1000,
        }
    }
}

/// Result of a [`Provider::list`](crate::Provider::list) call.
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Matched objects.
    pub objects: Vec<Object>,
    /// Common prefixes produced by delimiter-grouping.
    pub common_prefixes: Vec<String>,
    /// Whether more results exist beyond `max_keys`.
    pub is_truncated: bool,
}

/// Image-transform intent embeddable in a signed URL (spec §3
/// `SignedURLToken`), kept independent of the transform engine's own
/// [`TransformOptions`](../rt_image/struct.TransformOptions.html) so this
/// crate never needs to depend on `rt-image`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignedUrlTransform {
    /// Target width in pixels.
    #[serde(rename = "tw", default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Target height in pixels.
    #[serde(rename = "th", default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Output format (`webp`, `jpg`, `jpeg`, `png`, `avif`).
    #[serde(rename = "tf", default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Output quality, 1-100.
    #[serde(rename = "tq", default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Fit mode (`cover`, `contain`, `fill`, `inside`, `outside`).
    #[serde(rename = "ti", default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<String>,
}

/// Options for [`Provider::generate_signed_url`](crate::Provider::generate_signed_url).
#[derive(Debug, Clone)]
pub struct SignedUrlOptions {
    /// Seconds from now until the URL expires.
    pub expires_in: std::time::Duration,
    /// HTTP method the URL is valid for (`GET`, `PUT`, `DELETE`, ...).
    pub method: String,
    /// Optional embedded image-transform intent.
    pub transform: Option<SignedUrlTransform>,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: std::time::Duration::from_secs(3600),
            method: "GET".to_string(),
            transform: None,
        }
    }
}

/// Lifecycle state of a [`ChunkedUploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChunkedUploadStatus {
    /// Accepting chunk uploads.
    Active,
    /// `Complete` has been called; the final object exists.
    Completed,
    /// `Abort` has been called, or the session expired and was swept.
    Aborted,
}

/// Server-tracked multipart upload state (spec §3 `ChunkedUploadSession`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkedUploadSession {
    /// Random, unguessable upload id.
    pub upload_id: String,
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Total size of the final object, in bytes.
    pub total_size: u64,
    /// Size of each chunk, in bytes (the last chunk may be shorter).
    pub chunk_size: u64,
    /// `ceil(total_size / chunk_size)`.
    pub total_chunks: u32,
    /// Indices of chunks that have been uploaded so far.
    #[serde(default)]
    pub completed_chunks: Vec<u32>,
    /// Content type to apply to the final object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Metadata to apply to the final object.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Cache-Control to apply to the final object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Current lifecycle status.
    pub status: ChunkedUploadStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp (default `created_at + 24h`).
    pub expires_at: DateTime<Utc>,
    /// S3 backend only: the native multipart upload id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_upload_id: Option<String>,
    /// S3 backend only: part index -> etag, for the final `CompleteMultipartUpload` call.
    #[serde(default)]
    pub s3_part_etags: BTreeMap<u32, String>,
}

impl ChunkedUploadSession {
    /// `ceil(total_size / chunk_size)`, clamped to at least 1 chunk.
    #[must_use]
    pub fn compute_total_chunks(total_size: u64, chunk_size: u64) -> u32 {
        if chunk_size == 0 {
            return 1;
        }
        (total_size.div_ceil(chunk_size)).max(1) as u32
    }

    /// A fresh, unguessable upload id: 16 random bytes, hex-encoded.
    #[must_use]
    pub fn generate_upload_id() -> String {
        let mut bytes = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        hex::encode(bytes)
    }

    /// Whether every chunk `0..total_chunks` has been uploaded.
    #[must_use]
    pub fn is_fully_uploaded(&self) -> bool {
        (0..self.total_chunks).all(|i| self.completed_chunks.contains(&i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_clamps_within_bounds() {
        let r = ByteRange {
            start: 0,
            end: Some(1000),
        };
        assert_eq!(r.clamp(100).unwrap(), (0, 99));
    }

    #[test]
    fn byte_range_rejects_start_past_end() {
        let r = ByteRange {
            start: 200,
            end: None,
        };
        assert!(r.clamp(100).is_err());
    }

    #[test]
    fn parses_simple_range_header() {
        let r = ByteRange::parse("bytes=10-20").unwrap();
        assert_eq!(r.start, 10);
        assert_eq!(r.end, Some(20));
    }

    #[test]
    fn parses_open_ended_range_header() {
        let r = ByteRange::parse("bytes=10-").unwrap();
        assert_eq!(r.start, 10);
        assert_eq!(r.end, None);
    }

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(ChunkedUploadSession::compute_total_chunks(10, 3), 4);
        assert_eq!(ChunkedUploadSession::compute_total_chunks(9, 3), 3);
        assert_eq!(ChunkedUploadSession::compute_total_chunks(0, 3), 1);
    }

    #[test]
    fn upload_id_is_32_hex_chars() {
        let id = ChunkedUploadSession::generate_upload_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
