// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Minimal smoke-test binary for the sandboxed execution runtime.
//!
//! Runs a local `.ts`/`.js` source file through [`rt_runtime::Runtime`] and
//! prints the resulting [`rt_core::ExecutionResult`] as JSON. This is not
//! a server: it has no listening socket and exposes no REST surface,
//! keeping the platform's REST Non-goal intact (spec §1).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rt_cancel::CancelSignal;
use rt_config::WorkspaceConfig;
use rt_core::{ExecutionRequest, Permissions, RequestShape};
use rt_runtime::{Runtime, RuntimeOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Default config file looked up relative to the current directory, mirroring
/// the teacher CLI's `backplane.toml` convention.
const DEFAULT_CONFIG_PATH: &str = "fluxbase.toml";

#[derive(Parser, Debug)]
#[command(name = "fluxbase-runtime", version, about = "Sandboxed execution runtime smoke-test CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a source file as an HTTP-shaped function.
    Function {
        /// Path to the `.ts`/`.js` source file.
        path: PathBuf,

        /// Request method.
        #[arg(long, default_value = "GET")]
        method: String,

        /// Request URL.
        #[arg(long, default_value = "/")]
        url: String,

        /// Request body text.
        #[arg(long)]
        body: Option<String>,

        /// Timeout override in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run a source file as a background job.
    Job {
        /// Path to the `.ts`/`.js` source file.
        path: PathBuf,

        /// Job payload as a JSON object.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Timeout override in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (request, timeout_ms, path) = match cli.command {
        Commands::Function {
            path,
            method,
            url,
            body,
            timeout_ms,
        } => {
            let request = ExecutionRequest {
                id: uuid::Uuid::new_v4(),
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("fn")
                    .to_string(),
                namespace: "default".to_string(),
                actor_id: None,
                actor_email: None,
                actor_role: None,
                origin_url: None,
                base_url: None,
                shape: RequestShape::Http {
                    method,
                    url,
                    headers: BTreeMap::new(),
                    body,
                    params: BTreeMap::new(),
                    session_id: None,
                },
            };
            (request, timeout_ms, path)
        }
        Commands::Job {
            path,
            payload,
            timeout_ms,
        } => {
            let payload: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&payload).context("parse --payload as a JSON object")?;
            let request = ExecutionRequest {
                id: uuid::Uuid::new_v4(),
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("job")
                    .to_string(),
                namespace: "default".to_string(),
                actor_id: None,
                actor_email: None,
                actor_role: None,
                origin_url: None,
                base_url: None,
                shape: RequestShape::Job {
                    payload,
                    retry_count: 0,
                },
            };
            (request, timeout_ms, path)
        }
    };

    let code = std::fs::read_to_string(&path)
        .with_context(|| format!("read source file '{}'", path.display()))?;

    let options = load_runtime_options()?;
    let runtime = Runtime::new(options);
    let cancel = CancelSignal::new();
    let root_scope = cancel.scope();

    let result = runtime
        .execute(
            &root_scope,
            &code,
            &request,
            Permissions::default(),
            &cancel,
            &BTreeMap::new(),
            timeout_ms.map(Duration::from_millis),
        )
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Load `fluxbase.toml` from the current directory if present, applying env
/// overrides same as any other workspace config consumer, and translate its
/// `[runtime]` section into `RuntimeOptions`. Falls back to defaults when no
/// config file exists.
fn load_runtime_options() -> Result<RuntimeOptions> {
    let config_path = std::path::Path::new(DEFAULT_CONFIG_PATH);
    let mut options = RuntimeOptions::default();
    if !config_path.exists() {
        return Ok(options);
    }

    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("read config file '{}'", config_path.display()))?;
    let mut config: WorkspaceConfig =
        rt_config::from_toml_str(&raw).context("parse fluxbase.toml")?;
    rt_config::apply_env_overrides(&mut config);
    match rt_config::validate(&config) {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("config: {warning}");
            }
        }
        Err(err) => return Err(err).context("validate fluxbase.toml"),
    }

    options.public_url = config.runtime.public_url;
    options.signing_secret = config.runtime.jwt_secret.unwrap_or_default();
    if let Some(interpreter_path) = config.runtime.interpreter_path {
        options.interpreter_bin = interpreter_path;
    }
    Ok(options)
}
