// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `<key>.meta` sidecar JSON document (spec §4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside a cached transform payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    /// Content type of the cached payload.
    pub content_type: String,
    /// Payload size in bytes.
    pub size: u64,
    /// `"<bucket>/<key>"` of the source object this entry was derived from.
    pub source_key: String,
    /// Last time this entry was read.
    pub access_time: DateTime<Utc>,
    /// Time this entry was first written.
    pub created_at: DateTime<Utc>,
}

impl CacheEntryMeta {
    #[must_use]
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CacheEntryMeta always serializes")
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
