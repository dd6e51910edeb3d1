// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed configuration option structs for every component in this workspace.
//!
//! This is the `config` collaborator spec §1 names as external: it carries
//! the typed contract (one struct per component) plus TOML parsing and an
//! environment overlay. No CLI flag parsing or config-file discovery lives
//! here — which file to load, and whether a `--config` flag overrides it,
//! is orchestration left to the host application.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Parser-reported detail.
        reason: String,
    },
    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended field is unset.
    MissingOptionalField {
        /// Field name.
        field: String,
        /// Consequence of leaving it unset.
        hint: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
        }
    }
}

/// Top-level workspace configuration: one section per component.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Default)]
pub struct WorkspaceConfig {
    /// Execution runtime (C6) options.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Storage provider (C7-C9) options.
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    /// Image transform engine (C10) options.
    #[serde(default)]
    pub image: ImageConfig,
    /// Transform cache (C11) options.
    #[serde(default)]
    pub transform_cache: TransformCacheConfig,
    /// Log service (C13) options.
    #[serde(default)]
    pub log_service: LogServiceConfig,
}

/// Options for the execution runtime (C6).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Default timeout for `function` runs, in seconds (spec default 30).
    #[serde(default = "RuntimeConfig::default_function_timeout_secs")]
    pub function_timeout_secs: u64,
    /// Default timeout for `job` runs, in seconds (spec default 300).
    #[serde(default = "RuntimeConfig::default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Public URL of the platform; when set, emitted to the sandbox as
    /// `FLUXBASE_URL` (spec §4.4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// JWT HMAC signing secret for minted tokens (C2). Absent means the
    /// runtime proceeds without tokens — a non-fatal warning, not an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
    /// Path to the sandbox interpreter binary. `None` means discover via
    /// `PATH` (and the built-in fallback list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter_path: Option<String>,
}

impl RuntimeConfig {
    fn default_function_timeout_secs() -> u64 {
        30
    }
    fn default_job_timeout_secs() -> u64 {
        300
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            function_timeout_secs: Self::default_function_timeout_secs(),
            job_timeout_secs: Self::default_job_timeout_secs(),
            public_url: None,
            jwt_secret: None,
            interpreter_path: None,
        }
    }
}

/// Storage provider selection and per-backend settings (C7-C9).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// POSIX filesystem backend (C8).
    Local {
        /// Root directory all buckets live under.
        base_path: String,
        /// Base URL prepended to generated signed URLs.
        base_url: String,
        /// HMAC signing secret for signed URLs. Required to issue or
        /// validate any signed URL; absent means
        /// [`rt_error::ErrorKind::CapabilityUnavailable`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signing_secret: Option<String>,
    },
    /// S3-compatible backend (C9).
    S3 {
        /// Custom endpoint (MinIO, etc.); `None` uses AWS's default resolver.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        /// AWS region.
        region: String,
        /// Access key id. `None` defers to the default credential chain.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        /// Secret access key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
        /// Force path-style addressing (required by most non-AWS S3 stores).
        #[serde(default)]
        force_path_style: bool,
    },
}

/// Options for the image transform engine (C10).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ImageConfig {
    /// Dimension bucket size in pixels (spec default 50).
    #[serde(default = "ImageConfig::default_bucket_size")]
    pub bucket_size: u32,
    /// Hard cap on output width (spec default 8192).
    #[serde(default = "ImageConfig::default_max_width")]
    pub max_width: u32,
    /// Hard cap on output height (spec default 8192).
    #[serde(default = "ImageConfig::default_max_height")]
    pub max_height: u32,
    /// Hard cap on width × height (spec default 16,000,000).
    #[serde(default = "ImageConfig::default_max_total_pixels")]
    pub max_total_pixels: u64,
}

impl ImageConfig {
    fn default_bucket_size() -> u32 {
        50
    }
    fn default_max_width() -> u32 {
        8192
    }
    fn default_max_height() -> u32 {
        8192
    }
    fn default_max_total_pixels() -> u64 {
        16_000_000
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            bucket_size: Self::default_bucket_size(),
            max_width: Self::default_max_width(),
            max_height: Self::default_max_height(),
            max_total_pixels: Self::default_max_total_pixels(),
        }
    }
}

/// Options for the transform cache (C11).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct TransformCacheConfig {
    /// Bucket name the cache lives in (spec: `_transform_cache`).
    #[serde(default = "TransformCacheConfig::default_bucket_name")]
    pub bucket_name: String,
    /// Entry time-to-live in seconds (spec default 24h).
    #[serde(default = "TransformCacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum total cache size in bytes (spec default 1 GiB).
    #[serde(default = "TransformCacheConfig::default_max_total_size_bytes")]
    pub max_total_size_bytes: u64,
}

impl TransformCacheConfig {
    fn default_bucket_name() -> String {
        "_transform_cache".to_string()
    }
    fn default_ttl_secs() -> u64 {
        24 * 60 * 60
    }
    fn default_max_total_size_bytes() -> u64 {
        1024 * 1024 * 1024
    }
}

impl Default for TransformCacheConfig {
    fn default() -> Self {
        Self {
            bucket_name: Self::default_bucket_name(),
            ttl_secs: Self::default_ttl_secs(),
            max_total_size_bytes: Self::default_max_total_size_bytes(),
        }
    }
}

/// Which [`LogStorage`](../rt_log_storage/trait.LogStorage.html) backend to use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogBackendKind {
    /// Postgres-backed (default, online query support).
    #[default]
    Postgres,
    /// S3-compatible NDJSON-chunk backed.
    S3,
    /// Local filesystem NDJSON-backed.
    Local,
}

/// Options for the log service (C12-C13).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LogServiceConfig {
    /// Backend selection (spec default `postgres`).
    #[serde(default)]
    pub backend: LogBackendKind,
    /// Batch size before a forced flush (spec default 100).
    #[serde(default = "LogServiceConfig::default_batch_size")]
    pub batch_size: usize,
    /// Flush interval in milliseconds (spec default 1000).
    #[serde(default = "LogServiceConfig::default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Bounded write-buffer capacity (spec default 10000).
    #[serde(default = "LogServiceConfig::default_buffer_size")]
    pub buffer_size: usize,
    /// Bucket (S3 backend) the NDJSON chunks live in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Key prefix (S3 backend) or base directory (local backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_or_base_path: Option<String>,
}

impl LogServiceConfig {
    fn default_batch_size() -> usize {
        100
    }
    fn default_flush_interval_ms() -> u64 {
        1000
    }
    fn default_buffer_size() -> usize {
        10_000
    }
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            backend: LogBackendKind::default(),
            batch_size: Self::default_batch_size(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            buffer_size: Self::default_buffer_size(),
            bucket: None,
            prefix_or_base_path: None,
        }
    }
}

/// Parse a [`WorkspaceConfig`] from a TOML document.
pub fn from_toml_str(content: &str) -> Result<WorkspaceConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply environment-variable overlays on top of a parsed config.
///
/// Recognises `FLUXBASE_URL` and `FLUXBASE_AUTH_JWT_SECRET`, mirroring the
/// names the env builder (C4) itself reserves.
pub fn apply_env_overrides(config: &mut WorkspaceConfig) {
    if let Ok(val) = std::env::var("FLUXBASE_URL") {
        config.runtime.public_url = Some(val);
    }
    if let Ok(val) = std::env::var("FLUXBASE_AUTH_JWT_SECRET") {
        config.runtime.jwt_secret = Some(val);
    }
}

/// Validate a config, returning advisory warnings or a hard validation error.
pub fn validate(config: &WorkspaceConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.runtime.function_timeout_secs == 0 {
        errors.push("runtime.function_timeout_secs must be non-zero".to_string());
    }
    if config.runtime.job_timeout_secs == 0 {
        errors.push("runtime.job_timeout_secs must be non-zero".to_string());
    }
    if config.runtime.jwt_secret.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "runtime.jwt_secret".to_string(),
            hint: "executions will run without the SDK bridge (no tokens minted)".to_string(),
        });
    }

    if config.image.bucket_size == 0 {
        errors.push("image.bucket_size must be non-zero".to_string());
    }
    if config.image.max_total_pixels == 0 {
        errors.push("image.max_total_pixels must be non-zero".to_string());
    }

    if config.transform_cache.max_total_size_bytes == 0 {
        errors.push("transform_cache.max_total_size_bytes must be non-zero".to_string());
    }

    match &config.storage {
        Some(StorageConfig::Local { signing_secret, .. }) if signing_secret.is_none() => {
            warnings.push(ConfigWarning::MissingOptionalField {
                field: "storage.signing_secret".to_string(),
                hint: "signed URLs cannot be generated or validated".to_string(),
            });
        }
        None => warnings.push(ConfigWarning::MissingOptionalField {
            field: "storage".to_string(),
            hint: "no storage backend configured; storage operations are unavailable".to_string(),
        }),
        _ => {}
    }

    match config.log_service.backend {
        LogBackendKind::S3 if config.log_service.bucket.is_none() => {
            errors.push("log_service.bucket is required when backend = \"s3\"".to_string());
        }
        LogBackendKind::Local if config.log_service.prefix_or_base_path.is_none() => {
            errors.push(
                "log_service.prefix_or_base_path is required when backend = \"local\"".to_string(),
            );
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_with_warnings() {
        let cfg = WorkspaceConfig::default();
        let warnings = validate(&cfg).expect("defaults should validate");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn zero_timeout_is_a_hard_error() {
        let mut cfg = WorkspaceConfig::default();
        cfg.runtime.function_timeout_secs = 0;
        let err = validate(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn s3_log_backend_requires_bucket() {
        let mut cfg = WorkspaceConfig::default();
        cfg.log_service.backend = LogBackendKind::S3;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("bucket")));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn parses_local_storage_from_toml() {
        let toml = r#"
            [storage]
            backend = "local"
            base_path = "/data/blobs"
            base_url = "https://api.example.com"
            signing_secret = "s3cr3t"
        "#;
        let cfg = from_toml_str(toml).unwrap();
        match cfg.storage.unwrap() {
            StorageConfig::Local { base_path, .. } => assert_eq!(base_path, "/data/blobs"),
            StorageConfig::S3 { .. } => panic!("expected local"),
        }
    }

    #[test]
    fn env_override_sets_public_url() {
        // SAFETY-free: test env vars are process-local to the test binary;
        // serial execution within this module avoids cross-test races.
        unsafe {
            std::env::set_var("FLUXBASE_URL", "https://overridden.example");
        }
        let mut cfg = WorkspaceConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(
            cfg.runtime.public_url.as_deref(),
            Some("https://overridden.example")
        );
        unsafe {
            std::env::remove_var("FLUXBASE_URL");
        }
    }
}
