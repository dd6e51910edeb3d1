// SPDX-License-Identifier: MIT OR Apache-2.0
//! `<path>.meta` sidecar format: content-type and etag as first-class
//! fields, plus arbitrary `meta:k=v` lines (spec §3 `Object` invariant,
//! §4.8 "optional `<path>.meta` sidecar").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parsed sidecar contents.
#[derive(Debug, Clone, Default)]
pub struct SidecarMeta {
    /// Stored content type.
    pub content_type: Option<String>,
    /// Stored MD5 etag, so `get_object` doesn't need to rehash the payload.
    pub etag: Option<String>,
    /// Stored `Cache-Control` value.
    pub cache_control: Option<String>,
    /// Arbitrary user metadata.
    pub metadata: BTreeMap<String, String>,
}

/// Sidecar path for a given object path: `<path>.meta`.
#[must_use]
pub fn sidecar_path(object_path: &Path) -> PathBuf {
    let mut os = object_path.as_os_str().to_owned();
    os.push(".meta");
    PathBuf::from(os)
}

/// Render a sidecar file's text contents.
#[must_use]
pub fn render(meta: &SidecarMeta) -> String {
    let mut out = String::new();
    if let Some(ct) = &meta.content_type {
        out.push_str(&format!("content_type={ct}\n"));
    }
    if let Some(etag) = &meta.etag {
        out.push_str(&format!("etag={etag}\n"));
    }
    if let Some(cc) = &meta.cache_control {
        out.push_str(&format!("cache_control={cc}\n"));
    }
    for (k, v) in &meta.metadata {
        out.push_str(&format!("meta:{k}={v}\n"));
    }
    out
}

/// Parse a sidecar file's text contents.
#[must_use]
pub fn parse(contents: &str) -> SidecarMeta {
    let mut meta = SidecarMeta::default();
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("meta:") {
            if let Some((k, v)) = rest.split_once('=') {
                meta.metadata.insert(k.to_string(), v.to_string());
            }
        } else if let Some((k, v)) = line.split_once('=') {
            match k {
                "content_type" => meta.content_type = Some(v.to_string()),
                "etag" => meta.etag = Some(v.to_string()),
                "cache_control" => meta.cache_control = Some(v.to_string()),
                _ => {}
            }
        }
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_path_appends_suffix() {
        let p = sidecar_path(Path::new("/data/b/k.png"));
        assert_eq!(p, Path::new("/data/b/k.png.meta"));
    }

    #[test]
    fn render_then_parse_round_trips() {
        let mut meta = SidecarMeta {
            content_type: Some("image/png".to_string()),
            etag: Some("abc123".to_string()),
            cache_control: Some("max-age=60".to_string()),
            metadata: BTreeMap::new(),
        };
        meta.metadata.insert("owner".to_string(), "alice".to_string());
        let rendered = render(&meta);
        let parsed = parse(&rendered);
        assert_eq!(parsed.content_type.as_deref(), Some("image/png"));
        assert_eq!(parsed.etag.as_deref(), Some("abc123"));
        assert_eq!(parsed.cache_control.as_deref(), Some("max-age=60"));
        assert_eq!(parsed.metadata.get("owner").map(String::as_str), Some("alice"));
    }
}
