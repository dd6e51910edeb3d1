// SPDX-License-Identifier: MIT OR Apache-2.0
//! Portable executable discovery, similar to the shell `which` builtin.
//!
//! The runtime and the bundler both need to locate an external binary
//! (the JS/TS interpreter, a bundler) without assuming it is on `PATH` in
//! every deployment. [`which`] searches `PATH` first, then a caller-supplied
//! list of fallback directories — package managers often install these
//! tools outside the default `PATH` a daemon inherits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

/// Locate an executable by name, consulting `PATH` only.
///
/// If `bin` contains path separators, it is treated as a direct path.
#[must_use]
pub fn which(bin: &str) -> Option<PathBuf> {
    let candidate = Path::new(bin);
    if has_path(candidate) {
        return candidate.exists().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| resolve_in_dir(&dir, bin))
}

/// Locate an executable on `PATH`, falling back to `extra_dirs` in order
/// when `PATH` search fails. Used to find interpreters/bundlers installed
/// by a version manager or package manager outside the inherited `PATH`.
#[must_use]
pub fn which_with_fallback(bin: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    which(bin).or_else(|| extra_dirs.iter().find_map(|dir| resolve_in_dir(dir, bin)))
}

/// Return `true` when an executable can be resolved from `PATH` or an
/// explicit path.
#[must_use]
pub fn command_exists(command: &str) -> bool {
    which(command).is_some()
}

fn has_path(candidate: &Path) -> bool {
    candidate.components().count() > 1
}

fn resolve_in_dir(dir: &Path, command: &str) -> Option<PathBuf> {
    let direct = dir.join(command);
    if direct.exists() {
        return Some(direct);
    }

    if !cfg!(windows) {
        return None;
    }

    ["", ".exe", ".cmd", ".bat", ".com"]
        .into_iter()
        .map(|ext| dir.join(format!("{command}{ext}")))
        .find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_exists_is_consistent_with_which() {
        assert_eq!(
            command_exists("no-such-binary-rt"),
            which("no-such-binary-rt").is_some()
        );
    }

    #[test]
    fn fallback_is_not_consulted_when_path_search_succeeds() {
        let dir = tempfile_dir();
        let found = which_with_fallback("no-such-binary-rt", &[dir]);
        assert!(found.is_none());
    }

    #[test]
    fn fallback_dir_is_searched_in_order() {
        let dir = std::env::temp_dir().join(format!("rt-which-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bin = dir.join("my-fake-bundler");
        std::fs::write(&bin, b"").unwrap();

        let found = which_with_fallback("my-fake-bundler", &[dir.clone()]);
        assert_eq!(found.as_deref(), Some(bin.as_path()));

        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempfile_dir() -> PathBuf {
        std::env::temp_dir()
    }
}
