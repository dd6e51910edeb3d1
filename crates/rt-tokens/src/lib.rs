// SPDX-License-Identifier: MIT OR Apache-2.0
//! Short-lived bearer token minting (spec C2).
//!
//! Given `(secret, request, runtime_type, timeout)`, [`mint`] emits a
//! user-scoped and a service-scoped HS256 token bound to the execution id.
//! If the secret is empty, minting is a non-fatal warning: the runtime
//! proceeds without tokens and the sandbox SDK is simply unavailable.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rt_core::{ExecutionRequest, RuntimeType};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Issuer claim embedded in every token.
pub const ISSUER: &str = "fluxbase";

/// Default role for user-scoped tokens when the request carries no role.
pub const DEFAULT_USER_ROLE: &str = "authenticated";

/// Role for service-scoped tokens.
pub const SERVICE_ROLE: &str = "service_role";

/// Claims shared by both user- and service-scoped tokens.
#[derive(Debug, Serialize)]
struct Claims {
    iss: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    role: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
}

/// The pair of tokens minted for one execution.
#[derive(Debug, Clone, Default)]
pub struct IssuedTokens {
    /// User-scoped bearer token, bound to the actor on the request.
    pub user_token: Option<String>,
    /// Service-scoped bearer token.
    pub service_token: Option<String>,
}

impl IssuedTokens {
    /// `true` if at least one token was minted — the spec's network-grant
    /// condition ("network is additionally granted when either issued
    /// token is non-empty").
    #[must_use]
    pub fn any_issued(&self) -> bool {
        self.user_token.is_some() || self.service_token.is_some()
    }
}

/// Mint user- and service-scoped tokens for one execution.
///
/// Returns `IssuedTokens::default()` (no tokens, no error) when `secret`
/// is empty — this is a non-fatal condition callers should log a warning
/// for and proceed without sandbox SDK access.
#[must_use]
pub fn mint(
    secret: &str,
    request: &ExecutionRequest,
    runtime_type: RuntimeType,
    timeout: Duration,
) -> IssuedTokens {
    if secret.is_empty() {
        tracing::warn!(
            execution_id = %request.id,
            "signing secret is empty; proceeding without sandbox tokens"
        );
        return IssuedTokens::default();
    }

    let now = now_unix();
    let exp = now + timeout.as_secs() as i64;
    let key = EncodingKey::from_secret(secret.as_bytes());
    let header = Header::new(Algorithm::HS256);

    let (exec_claim, job_claim) = match runtime_type {
        RuntimeType::Function => (Some(request.id), None),
        RuntimeType::Job => (None, Some(request.id)),
    };

    let user_claims = Claims {
        iss: ISSUER,
        sub: request.actor_id.clone(),
        email: request.actor_email.clone(),
        role: request
            .actor_role
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_ROLE.to_string()),
        iat: now,
        nbf: now,
        exp,
        jti: Uuid::new_v4(),
        execution_id: exec_claim,
        job_id: job_claim,
    };

    let service_claims = Claims {
        iss: ISSUER,
        sub: Some(SERVICE_ROLE.to_string()),
        email: None,
        role: SERVICE_ROLE.to_string(),
        iat: now,
        nbf: now,
        exp,
        jti: Uuid::new_v4(),
        execution_id: exec_claim,
        job_id: job_claim,
    };

    let user_token = encode(&header, &user_claims, &key).ok();
    let service_token = encode(&header, &service_claims, &key).ok();

    if user_token.is_none() || service_token.is_none() {
        tracing::warn!(
            execution_id = %request.id,
            "token signing failed; proceeding without sandbox tokens"
        );
        return IssuedTokens::default();
    }

    IssuedTokens {
        user_token,
        service_token,
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
