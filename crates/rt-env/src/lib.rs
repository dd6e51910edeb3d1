// SPDX-License-Identifier: MIT OR Apache-2.0
//! Child process environment construction (spec C4).
//!
//! Builds the full environment list handed to the sandbox subprocess:
//! fixed defaults, a curated passthrough of host variables, every
//! `FLUXBASE_*` variable except a hardcoded, fail-closed denylist, and
//! user-supplied secrets under a `FLUXBASE_SECRET_` prefix.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rt_core::RuntimeType;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Variables always set, regardless of environment.
pub const ALWAYS_SET: &[(&str, &str)] = &[("DENO_DIR", "/tmp/deno"), ("HOME", "/tmp")];

/// Host variables passed through verbatim when present in the parent env.
pub const PASSTHROUGH: &[&str] = &[
    "PATH",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "CURL_CA_BUNDLE",
    "RESOLV_CONF",
    "LOCALDOMAIN",
    "RES_OPTIONS",
    "HOSTALIASES",
    "KUBERNETES_SERVICE_HOST",
    "KUBERNETES_SERVICE_PORT",
];

/// `FLUXBASE_*` variables that are never forwarded to the sandbox, no
/// matter what the caller or parent environment says. Fail-closed: a
/// name collision between a legitimate feature flag and a blocked
/// secret means the flag does not reach the sandbox.
pub const DENYLIST: &[&str] = &[
    "FLUXBASE_AUTH_JWT_SECRET",
    "FLUXBASE_DATABASE_PASSWORD",
    "FLUXBASE_DATABASE_ADMIN_PASSWORD",
    "FLUXBASE_STORAGE_S3_SECRET_KEY",
    "FLUXBASE_STORAGE_S3_ACCESS_KEY",
    "FLUXBASE_EMAIL_SMTP_PASSWORD",
    "FLUXBASE_SECURITY_SETUP_TOKEN",
    "FLUXBASE_ENCRYPTION_KEY",
];

const SECRET_PREFIX: &str = "FLUXBASE_SECRET_";
const FLUXBASE_PREFIX: &str = "FLUXBASE_";

/// Everything the env builder needs to know about one run. Takes the
/// parent environment as an explicit map (rather than reading
/// `std::env` directly) so it stays unit-testable.
#[derive(Debug, Clone)]
pub struct EnvInput<'a> {
    /// The parent process' environment, as observed at spawn time.
    pub parent_env: &'a BTreeMap<String, String>,
    /// Public base URL of the platform, if configured.
    pub public_url: Option<&'a str>,
    /// Which sandbox flavor is being built for.
    pub runtime_type: RuntimeType,
    /// Execution id (used for `FLUXBASE_EXECUTION_ID` / `FLUXBASE_JOB_ID`).
    pub execution_id: Uuid,
    /// Function/job name.
    pub name: &'a str,
    /// Function/job namespace.
    pub namespace: &'a str,
    /// Minted user token, if any.
    pub user_token: Option<&'a str>,
    /// Minted service token, if any.
    pub service_token: Option<&'a str>,
    /// Current cancellation state, mirrored into `FLUXBASE_*_CANCELLED`.
    pub cancelled: bool,
    /// Caller-supplied secrets (name -> value), copied byte-for-byte.
    pub secrets: &'a BTreeMap<String, String>,
}

/// Build the full child-process environment list for one execution.
#[must_use]
pub fn build(input: &EnvInput<'_>) -> Vec<(String, String)> {
    let mut env = Vec::new();

    for (k, v) in ALWAYS_SET {
        env.push(((*k).to_string(), (*v).to_string()));
    }

    for key in PASSTHROUGH {
        if let Some(value) = input.parent_env.get(*key) {
            env.push(((*key).to_string(), value.clone()));
        }
    }

    for (key, value) in input.parent_env {
        if key.starts_with(FLUXBASE_PREFIX) && !DENYLIST.contains(&key.as_str()) {
            env.push((key.clone(), value.clone()));
        }
    }

    if let Some(url) = input.public_url {
        if !url.is_empty() {
            env.push(("FLUXBASE_URL".to_string(), url.to_string()));
        }
    }

    let prefix = input.runtime_type.env_prefix();
    env.push((
        format!("FLUXBASE_{prefix}_ID"),
        input.execution_id.to_string(),
    ));
    env.push((format!("FLUXBASE_{prefix}_NAME"), input.name.to_string()));
    env.push((
        format!("FLUXBASE_{prefix}_NAMESPACE"),
        input.namespace.to_string(),
    ));
    if let Some(token) = input.user_token.filter(|t| !t.is_empty()) {
        env.push(("FLUXBASE_USER_TOKEN".to_string(), token.to_string()));
    }
    if let Some(token) = input.service_token.filter(|t| !t.is_empty()) {
        env.push(("FLUXBASE_SERVICE_TOKEN".to_string(), token.to_string()));
    }
    env.push((
        format!("FLUXBASE_{prefix}_CANCELLED"),
        input.cancelled.to_string(),
    ));

    for (name, value) in input.secrets {
        let key = if name.starts_with(FLUXBASE_PREFIX) {
            name.clone()
        } else {
            format!("{SECRET_PREFIX}{}", name.to_uppercase())
        };
        env.push((key, value.clone()));
    }

    env
}

/// Returns the comma-separated `--allow-env` allowlist for a run: the
/// fixed defaults, the curated passthrough, the runtime-specific
/// `FLUXBASE_*` names, and every secret name's resolved env-var name.
#[must_use]
pub fn allowed_env_vars<'a>(
    runtime_type: RuntimeType,
    secret_names: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut names: Vec<String> = ALWAYS_SET.iter().map(|(k, _)| (*k).to_string()).collect();
    names.extend(PASSTHROUGH.iter().map(|s| (*s).to_string()));
    names.push("FLUXBASE_URL".to_string());

    let prefix = runtime_type.env_prefix();
    names.push(format!("FLUXBASE_{prefix}_ID"));
    names.push(format!("FLUXBASE_{prefix}_NAME"));
    names.push(format!("FLUXBASE_{prefix}_NAMESPACE"));
    names.push("FLUXBASE_USER_TOKEN".to_string());
    names.push("FLUXBASE_SERVICE_TOKEN".to_string());
    names.push(format!("FLUXBASE_{prefix}_CANCELLED"));

    for name in secret_names {
        let key = if name.starts_with(FLUXBASE_PREFIX) {
            name.to_string()
        } else {
            format!("{SECRET_PREFIX}{}", name.to_uppercase())
        };
        names.push(key);
    }

    names.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input<'a>(
        parent_env: &'a BTreeMap<String, String>,
        secrets: &'a BTreeMap<String, String>,
    ) -> EnvInput<'a> {
        EnvInput {
            parent_env,
            public_url: Some("https://app.example.com"),
            runtime_type: RuntimeType::Function,
            execution_id: Uuid::nil(),
            name: "my-fn",
            namespace: "default",
            user_token: Some("user.tok"),
            service_token: Some("service.tok"),
            cancelled: false,
            secrets,
        }
    }

    #[test]
    fn always_sets_deno_dir_and_home() {
        let parent = BTreeMap::new();
        let secrets = BTreeMap::new();
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("DENO_DIR"), Some(&"/tmp/deno".to_string()));
        assert_eq!(map.get("HOME"), Some(&"/tmp".to_string()));
    }

    #[test]
    fn denylist_is_never_forwarded_even_if_present_in_parent() {
        let mut parent = BTreeMap::new();
        for key in DENYLIST {
            parent.insert((*key).to_string(), "leaked".to_string());
        }
        parent.insert("FLUXBASE_FEATURE_FLAG".to_string(), "on".to_string());
        let secrets = BTreeMap::new();
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        for key in DENYLIST {
            assert!(!map.contains_key(*key), "{key} must never be forwarded");
        }
        assert_eq!(map.get("FLUXBASE_FEATURE_FLAG"), Some(&"on".to_string()));
    }

    #[test]
    fn passthrough_only_forwards_whitelisted_names() {
        let mut parent = BTreeMap::new();
        parent.insert("PATH".to_string(), "/usr/bin".to_string());
        parent.insert("SHELL".to_string(), "/bin/bash".to_string());
        let secrets = BTreeMap::new();
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("PATH"), Some(&"/usr/bin".to_string()));
        assert!(!map.contains_key("SHELL"));
    }

    #[test]
    fn function_runtime_sets_function_prefixed_vars() {
        let parent = BTreeMap::new();
        let secrets = BTreeMap::new();
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(
            map.get("FLUXBASE_FUNCTION_NAME"),
            Some(&"my-fn".to_string())
        );
        assert_eq!(
            map.get("FLUXBASE_FUNCTION_NAMESPACE"),
            Some(&"default".to_string())
        );
        assert_eq!(
            map.get("FLUXBASE_USER_TOKEN"),
            Some(&"user.tok".to_string())
        );
        assert_eq!(map.get("FLUXBASE_FUNCTION_CANCELLED"), Some(&"false".to_string()));
        assert!(!map.contains_key("FLUXBASE_JOB_NAME"));
    }

    #[test]
    fn job_runtime_sets_job_prefixed_vars() {
        let parent = BTreeMap::new();
        let secrets = BTreeMap::new();
        let mut input = base_input(&parent, &secrets);
        input.runtime_type = RuntimeType::Job;
        input.cancelled = true;
        let env = build(&input);
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("FLUXBASE_JOB_NAME"), Some(&"my-fn".to_string()));
        assert_eq!(map.get("FLUXBASE_JOB_CANCELLED"), Some(&"true".to_string()));
        assert!(!map.contains_key("FLUXBASE_FUNCTION_NAME"));
    }

    #[test]
    fn empty_tokens_are_not_forwarded() {
        let parent = BTreeMap::new();
        let secrets = BTreeMap::new();
        let mut input = base_input(&parent, &secrets);
        input.user_token = Some("");
        input.service_token = None;
        let env = build(&input);
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert!(!map.contains_key("FLUXBASE_USER_TOKEN"));
        assert!(!map.contains_key("FLUXBASE_SERVICE_TOKEN"));
    }

    #[test]
    fn secrets_already_fluxbase_prefixed_pass_verbatim() {
        let parent = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        secrets.insert("FLUXBASE_CUSTOM".to_string(), "v1".to_string());
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(map.get("FLUXBASE_CUSTOM"), Some(&"v1".to_string()));
    }

    #[test]
    fn other_secrets_are_uppercased_and_prefixed() {
        let parent = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        secrets.insert("stripe_key".to_string(), "sk_live_123".to_string());
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(
            map.get("FLUXBASE_SECRET_STRIPE_KEY"),
            Some(&"sk_live_123".to_string())
        );
    }

    #[test]
    fn secret_values_are_copied_byte_exactly() {
        let parent = BTreeMap::new();
        let mut secrets = BTreeMap::new();
        let tricky = "a=b\nline2\n\u{1F600}";
        secrets.insert("tricky".to_string(), tricky.to_string());
        let env = build(&base_input(&parent, &secrets));
        let map: BTreeMap<_, _> = env.into_iter().collect();
        assert_eq!(
            map.get("FLUXBASE_SECRET_TRICKY").map(String::as_str),
            Some(tricky)
        );
    }

    #[test]
    fn allowed_env_vars_includes_secret_resolved_names() {
        let csv = allowed_env_vars(RuntimeType::Function, ["stripe_key", "FLUXBASE_CUSTOM"]);
        assert!(csv.contains("FLUXBASE_SECRET_STRIPE_KEY"));
        assert!(csv.contains("FLUXBASE_CUSTOM"));
        assert!(csv.contains("FLUXBASE_FUNCTION_CANCELLED"));
    }

    proptest::proptest! {
        #[test]
        fn denylist_never_leaks_for_any_parent_env(
            extra_value in "[a-zA-Z0-9]{0,20}"
        ) {
            let mut parent = BTreeMap::new();
            for key in DENYLIST {
                parent.insert((*key).to_string(), extra_value.clone());
            }
            let secrets = BTreeMap::new();
            let env = build(&base_input(&parent, &secrets));
            for (k, _) in &env {
                proptest::prop_assert!(!DENYLIST.contains(&k.as_str()));
            }
        }
    }
}
