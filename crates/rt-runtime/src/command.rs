// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability-flag command construction for the sandbox subprocess
//! (spec §4.6 step 6).

use rt_core::Permissions;
use std::path::Path;
use tokio::process::Command;

/// Build the child command for one execution.
///
/// `allow_env_value` is the literal value for `--allow-env`: `None` means
/// unrestricted (`--allow-env` with no value), `Some(csv)` means the
/// scoped allowlist from `rt_env::allowed_env_vars`.
#[must_use]
pub fn build_command(
    interpreter: &Path,
    temp_file: &Path,
    permissions: Permissions,
    grant_net: bool,
    allow_env_value: Option<&str>,
    env: &[(String, String)],
) -> Command {
    let mut cmd = Command::new(interpreter);
    cmd.arg("run");

    if permissions.memory_limit_mb > 0 {
        if let Some(available) = available_ram_mb() {
            if permissions.memory_limit_mb as u64 > available {
                tracing::warn!(
                    requested_mb = permissions.memory_limit_mb,
                    available_mb = available,
                    "requested memory limit exceeds available RAM; passing flag anyway"
                );
            }
        }
        cmd.arg(format!(
            "--v8-flags=--max-old-space-size={}",
            permissions.memory_limit_mb
        ));
    }

    if permissions.allow_net || grant_net {
        cmd.arg("--allow-net");
    }

    if permissions.allow_env {
        cmd.arg("--allow-env");
    } else if let Some(csv) = allow_env_value {
        cmd.arg(format!("--allow-env={csv}"));
    }

    if permissions.allow_read {
        cmd.arg("--allow-read");
    }
    if permissions.allow_write {
        cmd.arg("--allow-write");
    }

    cmd.arg(temp_file);

    cmd.env_clear();
    for (k, v) in env {
        cmd.env(k, v);
    }

    cmd
}

/// Best-effort available system RAM query, in megabytes.
/// Returns `None` when the platform doesn't expose `/proc/meminfo` (only
/// Linux is supported; elsewhere the memory-limit warning is simply
/// skipped, matching the non-fatal nature of the check in spec §4.6).
fn available_ram_mb() -> Option<u64> {
    system_ram_mb().map(|ram| ram.available_mb)
}

/// Available and total system RAM, in megabytes, as of the moment of the
/// call. Used both for the startup capability-flag warning and for the
/// job-OOM message (spec §4.6 step 10), which cites requested MB,
/// available MB at start, and system total MB.
#[derive(Debug, Clone, Copy)]
pub struct SystemRam {
    /// `MemAvailable` from `/proc/meminfo`, in megabytes.
    pub available_mb: u64,
    /// `MemTotal` from `/proc/meminfo`, in megabytes.
    pub total_mb: u64,
}

/// Query `/proc/meminfo` for available and total RAM. `None` on
/// non-Linux platforms or if the file is unreadable/malformed.
#[must_use]
pub fn system_ram_mb() -> Option<SystemRam> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    let field = |name: &str| -> Option<u64> {
        contents
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
    };
    Some(SystemRam {
        available_mb: field("MemAvailable:")? / 1024,
        total_mb: field("MemTotal:")? / 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_permissions() -> Permissions {
        Permissions::default()
    }

    #[test]
    fn memory_flag_is_added_when_limit_set() {
        let mut permissions = base_permissions();
        permissions.memory_limit_mb = 256;
        let cmd = build_command(
            Path::new("deno"),
            Path::new("/tmp/x.ts"),
            permissions,
            false,
            None,
            &[],
        );
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().any(|a| a == "--v8-flags=--max-old-space-size=256"));
    }

    #[test]
    fn net_is_granted_when_tokens_issued_even_without_allow_net() {
        let permissions = base_permissions();
        let cmd = build_command(
            Path::new("deno"),
            Path::new("/tmp/x.ts"),
            permissions,
            true,
            None,
            &[],
        );
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().any(|a| a == "--allow-net"));
    }

    #[test]
    fn scoped_allow_env_is_used_when_not_unrestricted() {
        let permissions = base_permissions();
        let cmd = build_command(
            Path::new("deno"),
            Path::new("/tmp/x.ts"),
            permissions,
            false,
            Some("PATH,HOME"),
            &[],
        );
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().any(|a| a == "--allow-env=PATH,HOME"));
    }

    #[test]
    fn unrestricted_allow_env_omits_value() {
        let mut permissions = base_permissions();
        permissions.allow_env = true;
        let cmd = build_command(
            Path::new("deno"),
            Path::new("/tmp/x.ts"),
            permissions,
            false,
            Some("PATH"),
            &[],
        );
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.iter().any(|a| a == "--allow-env"));
        assert!(!args.iter().any(|a| a == "--allow-env=PATH"));
    }

    #[test]
    fn final_arg_is_temp_file_path() {
        let permissions = base_permissions();
        let cmd = build_command(
            Path::new("deno"),
            Path::new("/tmp/x.ts"),
            permissions,
            false,
            None,
            &[],
        );
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().map(String::as_str), Some("/tmp/x.ts"));
    }
}
