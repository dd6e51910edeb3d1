// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filesystem path sanitizer for the local backend (spec §4.7 "Path guard").
//!
//! Every bucket and every slash-delimited key segment must be non-empty,
//! must not contain `..`, must not contain NUL, and must not be absolute.
//! The joined path is re-cleaned and must still have the bucket directory
//! as a prefix — otherwise the join "escaped" via a symlink-unaware trick
//! like a trailing `..` component, and the whole call is a hard failure.

use rt_error::RuntimeError;
use std::path::{Component, Path, PathBuf};

fn validate_segment(segment: &str) -> Result<(), RuntimeError> {
    if segment.is_empty() {
        return Err(RuntimeError::invalid_input("invalid path: empty segment"));
    }
    if segment == "." || segment == ".." {
        return Err(RuntimeError::invalid_input(
            "invalid path: relative traversal segment",
        ));
    }
    if segment.contains('\0') {
        return Err(RuntimeError::invalid_input("invalid path: contains NUL"));
    }
    Ok(())
}

/// Validate a bucket name in isolation (non-empty, no traversal, no NUL,
/// not absolute).
pub fn validate_bucket_name(bucket: &str) -> Result<(), RuntimeError> {
    if bucket.is_empty() {
        return Err(RuntimeError::invalid_input("invalid path: empty bucket"));
    }
    if Path::new(bucket).is_absolute() {
        return Err(RuntimeError::invalid_input(
            "invalid path: bucket must not be absolute",
        ));
    }
    for segment in bucket.split('/') {
        validate_segment(segment)?;
    }
    Ok(())
}

/// Resolve `(bucket, key)` to a path under `base`, rejecting anything that
/// would escape the bucket directory.
///
/// Returns the cleaned absolute path `base/bucket/key` on success.
pub fn guard_path(base: &Path, bucket: &str, key: &str) -> Result<PathBuf, RuntimeError> {
    validate_bucket_name(bucket)?;

    if key.is_empty() {
        return Err(RuntimeError::invalid_input("invalid path: empty key"));
    }
    if key.contains('\0') {
        return Err(RuntimeError::invalid_input("invalid path: contains NUL"));
    }
    if Path::new(key).is_absolute() {
        return Err(RuntimeError::invalid_input(
            "invalid path: key must not be absolute",
        ));
    }
    for segment in key.split('/') {
        validate_segment(segment)?;
    }

    let bucket_dir = clean(&base.join(bucket));
    let joined = clean(&bucket_dir.join(key));

    if !joined.starts_with(&bucket_dir) {
        return Err(RuntimeError::invalid_input(
            "path escapes bucket directory",
        ));
    }

    Ok(joined)
}

/// Lexically clean a path: resolve `.` and collapse redundant separators
/// without touching the filesystem (no symlink resolution — this is a
/// textual guard, not a sandboxing primitive; the runner's own OS-level
/// read/write flags are the actual capability boundary, per spec §9).
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_key() {
        let base = Path::new("/data");
        let p = guard_path(base, "avatars", "a/b.png").unwrap();
        assert_eq!(p, Path::new("/data/avatars/a/b.png"));
    }

    #[test]
    fn rejects_dotdot_in_key() {
        let base = Path::new("/data");
        assert!(guard_path(base, "avatars", "../secret").is_err());
        assert!(guard_path(base, "avatars", "a/../../secret").is_err());
    }

    #[test]
    fn rejects_dotdot_in_bucket() {
        let base = Path::new("/data");
        assert!(guard_path(base, "..", "a").is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        let base = Path::new("/data");
        assert!(guard_path(base, "avatars", "a\0b").is_err());
    }

    #[test]
    fn rejects_absolute_key() {
        let base = Path::new("/data");
        assert!(guard_path(base, "avatars", "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_empty_segments() {
        let base = Path::new("/data");
        assert!(guard_path(base, "avatars", "a//b").is_err());
        assert!(guard_path(base, "", "a").is_err());
    }

    #[test]
    fn cleaned_path_keeps_bucket_prefix() {
        let base = Path::new("/data");
        let p = guard_path(base, "avatars", "./a/./b.png").unwrap();
        assert!(p.starts_with("/data/avatars"));
    }
}
