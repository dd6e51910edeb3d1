// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-based chunked-upload sessions (spec §4.8 "Chunked upload
//! sessions"): `<basePath>/.chunked/<uploadID>/{session.json, chunk_NNNNNN}`.

use chrono::Utc;
use md5::{Digest, Md5};
use rt_error::RuntimeError;
use rt_storage_core::{ChunkedUploadSession, ChunkedUploadStatus};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Directory name under `base_path` that holds all in-progress sessions.
pub const CHUNKED_DIR: &str = ".chunked";

/// Default session lifetime: now + 24h (spec §3 `ChunkedUploadSession`).
pub const DEFAULT_EXPIRY_SECS: i64 = 24 * 60 * 60;

/// Age after which an unparsable session directory is swept, per spec
/// §4.8 "Sweeper".
pub const ORPHAN_SWEEP_AGE_SECS: i64 = 48 * 60 * 60;

#[must_use]
pub fn session_dir(base_path: &Path, upload_id: &str) -> PathBuf {
    base_path.join(CHUNKED_DIR).join(upload_id)
}

#[must_use]
pub fn session_file(dir: &Path) -> PathBuf {
    dir.join("session.json")
}

#[must_use]
pub fn chunk_file(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("chunk_{index:06}"))
}

/// Persist a session's JSON to `session.json` under its directory.
pub async fn write_session(dir: &Path, session: &ChunkedUploadSession) -> Result<(), RuntimeError> {
    let json = serde_json::to_vec_pretty(session)
        .map_err(|e| RuntimeError::invalid_input(format!("failed to encode session: {e}")))?;
    tokio::fs::write(session_file(dir), json)
        .await
        .map_err(|e| RuntimeError::transport_failure(format!("failed to write session: {e}")).with_source(e))
}

/// Load a session's JSON, without refreshing `completed_chunks` from disk.
pub async fn read_session(dir: &Path) -> Result<ChunkedUploadSession, RuntimeError> {
    let bytes = tokio::fs::read(session_file(dir)).await.map_err(|_| {
        RuntimeError::not_found("chunked upload session not found")
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RuntimeError::invalid_input(format!("corrupt session file: {e}")))
}

/// Probe the session directory for `chunk_NNNNNN` files and refresh
/// `completed_chunks` to match (spec §4.8 "Get reads the session and
/// refreshes CompletedChunks by filesystem probe").
pub async fn refresh_completed_chunks(
    dir: &Path,
    session: &mut ChunkedUploadSession,
) -> Result<(), RuntimeError> {
    let mut completed = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| RuntimeError::transport_failure(format!("failed to scan session dir: {e}")).with_source(e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(idx_str) = name.strip_prefix("chunk_")
            && let Ok(idx) = idx_str.parse::<u32>()
        {
            completed.push(idx);
        }
    }
    completed.sort_unstable();
    session.completed_chunks = completed;
    Ok(())
}

/// Write one chunk's bytes to disk, returning its MD5 etag and length.
pub async fn write_chunk(
    dir: &Path,
    index: u32,
    mut reader: rt_storage_core::BoxAsyncRead,
) -> Result<(String, u64), RuntimeError> {
    let path = chunk_file(dir, index);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| RuntimeError::transport_failure(format!("failed to create chunk file: {e}")).with_source(e))?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| RuntimeError::transport_failure(format!("failed to read chunk body: {e}")).with_source(e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .await
            .map_err(|e| RuntimeError::transport_failure(format!("failed to write chunk: {e}")).with_source(e))?;
        total += n as u64;
    }
    file.flush()
        .await
        .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
    Ok((hex::encode(hasher.finalize()), total))
}

/// Concatenate `chunk_0 .. chunk_{total_chunks-1}` into `dest`, returning
/// the full-object MD5 digest and total length.
pub async fn concatenate_chunks(
    dir: &Path,
    total_chunks: u32,
    dest: &Path,
) -> Result<(String, u64), RuntimeError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
    }
    let mut out = tokio::fs::File::create(dest)
        .await
        .map_err(|e| RuntimeError::transport_failure(format!("failed to create destination: {e}")).with_source(e))?;
    let mut hasher = Md5::new();
    let mut total: u64 = 0;

    for index in 0..total_chunks {
        let path = chunk_file(dir, index);
        let mut bytes = tokio::fs::read(&path).await.map_err(|_| {
            RuntimeError::invalid_input(format!("missing chunk {index} for completion"))
        })?;
        hasher.update(&bytes);
        total += bytes.len() as u64;
        out.write_all(&bytes)
            .await
            .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
        bytes.clear();
    }
    out.flush()
        .await
        .map_err(|e| RuntimeError::transport_failure(e.to_string()).with_source(e))?;
    Ok((hex::encode(hasher.finalize()), total))
}

/// Remove a session's entire directory.
pub async fn remove_session_dir(dir: &Path) -> Result<(), RuntimeError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::transport_failure(e.to_string()).with_source(e)),
    }
}

/// Build a fresh session with defaults applied (spec §4.8 "Init").
#[must_use]
pub fn new_session(
    bucket: &str,
    key: &str,
    total_size: u64,
    chunk_size: u64,
    content_type: Option<String>,
    metadata: std::collections::BTreeMap<String, String>,
    cache_control: Option<String>,
) -> ChunkedUploadSession {
    let now = Utc::now();
    ChunkedUploadSession {
        upload_id: ChunkedUploadSession::generate_upload_id(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        total_size,
        chunk_size,
        total_chunks: ChunkedUploadSession::compute_total_chunks(total_size, chunk_size),
        completed_chunks: Vec::new(),
        content_type,
        metadata,
        cache_control,
        status: ChunkedUploadStatus::Active,
        created_at: now,
        expires_at: now + chrono::Duration::seconds(DEFAULT_EXPIRY_SECS),
        s3_upload_id: None,
        s3_part_etags: std::collections::BTreeMap::new(),
    }
}
