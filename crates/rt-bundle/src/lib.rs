// SPDX-License-Identifier: MIT OR Apache-2.0
//! Optional pre-bundle of user code and forbidden-module validation (C5).
//!
//! [`needs_bundle`] and [`validate_imports`] are pure text scans, matching
//! the sandbox's own naive top-level lexical view of the source (see
//! `rt-import-split`, which shares that philosophy). [`bundle`] shells out
//! to an external bundler discovered via [`rt_which`], when one is
//! configured and present; in its absence the source passes through
//! unbundled rather than failing the run.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::Stdio;

use rt_error::RuntimeError;
use tokio::process::Command;

/// Platform modules a sandboxed function/job may never import.
const FORBIDDEN_MODULES: &[&str] = &["child_process", "vm", "fs", "process"];

/// Outcome of [`bundle`].
#[derive(Debug, Clone)]
pub struct BundleResult {
    /// The code to execute: bundled output, or `original_code` unchanged.
    pub bundled_code: String,
    /// Whether `bundled_code` differs from `original_code`.
    pub is_bundled: bool,
    /// The source exactly as it was passed in.
    pub original_code: String,
}

/// Detect bare top-level imports: a `^import ` line, or an `npm:`/URL-style
/// module specifier, ignoring `//`-commented and string-embedded
/// occurrences (the same naive line scan as `rt-import-split`).
#[must_use]
pub fn needs_bundle(code: &str) -> bool {
    code.lines().any(|line| {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            return false;
        }
        (trimmed.starts_with("import ") || trimmed.starts_with("import{"))
            && !line_only_inside_string(line)
    })
}

fn line_only_inside_string(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('"') || trimmed.starts_with('\'') || trimmed.starts_with('`')
}

/// Reject imports of forbidden platform modules, including `node:`-prefixed
/// forms. Returns an error naming the offending module on the first match.
pub fn validate_imports(code: &str) -> rt_error::Result<()> {
    for line in code.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") {
            continue;
        }
        if let Some(module) = imported_module(trimmed) {
            let bare = module.strip_prefix("node:").unwrap_or(module);
            if FORBIDDEN_MODULES.contains(&bare) {
                return Err(RuntimeError::invalid_input(format!(
                    "import of forbidden module '{module}' is not permitted"
                ))
                .with_context("module", module));
            }
        }
    }
    Ok(())
}

/// Extract the quoted module specifier from an import/export-from line, if any.
fn imported_module(line: &str) -> Option<&str> {
    if !(line.starts_with("import ") || line.starts_with("import{") || line.starts_with("export "))
    {
        return None;
    }
    let rest = line.rsplit("from").next()?;
    let quote = rest.find(|c| c == '\'' || c == '"')?;
    let rest = &rest[quote + 1..];
    let end = rest.find(|c| c == '\'' || c == '"')?;
    Some(&rest[..end])
}

/// Invoke an external bundler over `code`, when one is configured.
///
/// `bundler_bin` is the executable name to search for (e.g. `"esbuild"`);
/// `extra_dirs` are additional directories to search when it is absent from
/// `PATH`. `npm:`-prefixed imports are left untouched by the caller's
/// bundler invocation so runtime module resolution can still occur for
/// them; this function does not rewrite the source, it only shells out.
///
/// When the bundler cannot be located, or bundling fails, the original
/// source is returned unbundled rather than failing the caller — bundling
/// is an optimization, not a correctness requirement.
pub async fn bundle(
    bundler_bin: &str,
    extra_dirs: &[PathBuf],
    code: &str,
) -> rt_error::Result<BundleResult> {
    let Some(bin) = rt_which::which_with_fallback(bundler_bin, extra_dirs) else {
        tracing::debug!(bundler = bundler_bin, "bundler not found, passing through");
        return Ok(BundleResult {
            bundled_code: code.to_string(),
            is_bundled: false,
            original_code: code.to_string(),
        });
    };

    let mut child = Command::new(&bin)
        .arg("--bundle")
        .arg("--format=esm")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            RuntimeError::capability_unavailable("failed to spawn bundler").with_source(e)
        })?;

    {
        use tokio::io::AsyncWriteExt;
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin
            .write_all(code.as_bytes())
            .await
            .map_err(|e| RuntimeError::transport_failure("failed to write to bundler stdin").with_source(e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| RuntimeError::transport_failure("failed to await bundler").with_source(e))?;

    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        strip_temp_path_noise(&mut stderr);
        return Err(RuntimeError::capability_unavailable(format!(
            "bundler exited with failure: {stderr}"
        )));
    }

    let bundled = String::from_utf8(output.stdout).map_err(|e| {
        RuntimeError::protocol_violation("bundler produced non-UTF-8 output").with_source(e)
    })?;

    Ok(BundleResult {
        bundled_code: bundled,
        is_bundled: true,
        original_code: code.to_string(),
    })
}

/// Strip scratch-directory paths from a bundler error so presentation does
/// not leak the host's temp layout (e.g. `/tmp/fluxbase-xyz123/mod.ts`).
fn strip_temp_path_noise(message: &mut String) {
    let tmp = std::env::temp_dir();
    let Some(tmp_str) = tmp.to_str() else {
        return;
    };
    while let Some(pos) = message.find(tmp_str) {
        let end = message[pos..]
            .find(char::is_whitespace)
            .map(|off| pos + off)
            .unwrap_or(message.len());
        message.replace_range(pos..end, "<tmp>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_bundle_detects_bare_import() {
        assert!(needs_bundle("import foo from 'bar';\nconst x = 1;"));
    }

    #[test]
    fn needs_bundle_ignores_commented_import() {
        assert!(!needs_bundle("// import foo from 'bar';\nconst x = 1;"));
    }

    #[test]
    fn needs_bundle_ignores_string_embedded_import() {
        assert!(!needs_bundle("\"import foo from 'bar'\"\nconst x = 1;"));
    }

    #[test]
    fn needs_bundle_false_for_plain_code() {
        assert!(!needs_bundle("const x = 1;\nfunction f() { return x; }"));
    }

    #[test]
    fn validate_imports_rejects_fs() {
        let err = validate_imports("import fs from 'fs';").unwrap_err();
        assert!(err.to_string().contains("fs"));
    }

    #[test]
    fn validate_imports_rejects_node_prefixed_child_process() {
        let err = validate_imports("import cp from 'node:child_process';").unwrap_err();
        assert!(err.to_string().contains("node:child_process"));
    }

    #[test]
    fn validate_imports_allows_ordinary_module() {
        assert!(validate_imports("import { z } from 'zod';").is_ok());
    }

    #[test]
    fn validate_imports_allows_npm_specifier() {
        assert!(validate_imports("import z from 'npm:zod';").is_ok());
    }

    #[test]
    fn validate_imports_rejects_vm_in_export_from() {
        let err = validate_imports("export * from 'vm';").unwrap_err();
        assert!(err.to_string().contains("vm"));
    }

    #[tokio::test]
    async fn bundle_passes_through_when_bundler_missing() {
        let result = bundle("no-such-bundler-rt", &[], "const x = 1;")
            .await
            .unwrap();
        assert!(!result.is_bundled);
        assert_eq!(result.bundled_code, "const x = 1;");
        assert_eq!(result.original_code, "const x = 1;");
    }

    #[test]
    fn strip_temp_path_noise_removes_tmp_segment() {
        let tmp = std::env::temp_dir();
        let mut message = format!("cannot read {}/mod.ts: no such file", tmp.display());
        strip_temp_path_noise(&mut message);
        assert!(!message.contains(tmp.to_str().unwrap()));
        assert!(message.contains("<tmp>"));
    }
}
