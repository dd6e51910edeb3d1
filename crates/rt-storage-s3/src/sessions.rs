// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory tracking of chunked-upload sessions for the S3 backend.
//!
//! Unlike the local backend's sidecar-directory sessions, S3 already holds
//! the authoritative multipart-upload state; this registry only remembers
//! which `(bucket, key)` a given native `upload_id` belongs to and mirrors
//! the part etags this process has observed, so [`ChunkedUploadSession`]
//! has somewhere to live between calls.

use chrono::Utc;
use rt_storage_core::{ChunkedUploadSession, ChunkedUploadStatus};
use std::collections::BTreeMap;
use std::sync::Mutex;

const DEFAULT_EXPIRY_SECS: i64 = 24 * 60 * 60;

/// Build a fresh session keyed by the native S3 multipart `upload_id`.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn new_session(
    bucket: &str,
    key: &str,
    total_size: u64,
    chunk_size: u64,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
    cache_control: Option<String>,
    s3_upload_id: String,
) -> ChunkedUploadSession {
    let now = Utc::now();
    ChunkedUploadSession {
        upload_id: s3_upload_id.clone(),
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
        s3_upload_id: Some(s3_upload_id),
        s3_part_etags: BTreeMap::new(),
    }
}

/// Process-local registry of in-flight chunked-upload sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<String, ChunkedUploadSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: ChunkedUploadSession) {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .insert(session.upload_id.clone(), session);
    }

    #[must_use]
    pub fn get(&self, upload_id: &str) -> Option<ChunkedUploadSession> {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .get(upload_id)
            .cloned()
    }

    pub fn record_part(&self, upload_id: &str, index: u32, etag: String) {
        let mut sessions = self.sessions.lock().expect("session registry mutex poisoned");
        if let Some(session) = sessions.get_mut(upload_id) {
            session.s3_part_etags.insert(index, etag);
            if !session.completed_chunks.contains(&index) {
                session.completed_chunks.push(index);
                session.completed_chunks.sort_unstable();
            }
        }
    }

    pub fn remove(&self, upload_id: &str) {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .remove(upload_id);
    }

    /// Remove and return `(upload_id, bucket, key)` for every session past
    /// its `expires_at`.
    #[must_use]
    pub fn sweep_expired(&self) -> Vec<(String, String, String)> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("session registry mutex poisoned");
        let expired_ids: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now > s.expires_at)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|s| (id, s.bucket, s.key)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let session = new_session("b", "k", 10, 5, None, BTreeMap::new(), None, "upload-1".to_string());
        registry.insert(session.clone());
        let fetched = registry.get("upload-1").unwrap();
        assert_eq!(fetched.bucket, "b");
        assert_eq!(fetched.total_chunks, 2);
    }

    #[test]
    fn record_part_tracks_completed_chunks() {
        let registry = SessionRegistry::new();
        registry.insert(new_session("b", "k", 10, 5, None, BTreeMap::new(), None, "u".to_string()));
        registry.record_part("u", 1, "etag-1".to_string());
        let session = registry.get("u").unwrap();
        assert_eq!(session.completed_chunks, vec![1]);
        assert_eq!(session.s3_part_etags.get(&1).map(String::as_str), Some("etag-1"));
    }

    #[test]
    fn sweep_expired_removes_past_deadline_sessions() {
        let registry = SessionRegistry::new();
        let mut session = new_session("b", "k", 10, 5, None, BTreeMap::new(), None, "u".to_string());
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        registry.insert(session);

        let expired = registry.sweep_expired();
        assert_eq!(expired, vec![("u".to_string(), "b".to_string(), "k".to_string())]);
        assert!(registry.get("u").is_none());
    }
}
