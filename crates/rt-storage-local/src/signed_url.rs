// SPDX-License-Identifier: MIT OR Apache-2.0
//! HMAC-sealed signed URL tokens for the local backend (spec §3
//! `SignedURLToken`, §6 wire form).
//!
//! Wire form: `base64url( JSON(token) || HMAC_SHA256(JSON(token)) )`. The
//! last 32 bytes of the decoded payload are the tag; it is verified with
//! [`hmac`]'s built-in constant-time comparison.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rt_error::RuntimeError;
use rt_storage_core::SignedUrlTransform;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The HTTP path this token generator assumes a host-side handler will
/// mount (spec §9 Open Question 1). No handler is implemented here — out
/// of scope — but the constant is exported so a future REST layer can
/// match it exactly.
pub const SIGNED_URL_PATH: &str = "/api/v1/storage/object";

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    b: String,
    k: String,
    e: i64,
    m: String,
    #[serde(flatten)]
    transform: SignedUrlTransform,
}

/// A decoded, verified signed-URL token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlRecord {
    /// Bucket the token grants access to.
    pub bucket: String,
    /// Key the token grants access to.
    pub key: String,
    /// HTTP method the token is valid for.
    pub method: String,
    /// Unix-seconds expiry.
    pub expires_at: i64,
    /// Optional embedded image-transform intent.
    pub transform: Option<SignedUrlTransform>,
}

/// Seal a new token (spec §4.8 "Signed URLs").
pub fn generate(
    secret: &[u8],
    bucket: &str,
    key: &str,
    method: &str,
    expires_at_unix: i64,
    transform: Option<SignedUrlTransform>,
) -> Result<String, RuntimeError> {
    let payload = TokenPayload {
        b: bucket.to_string(),
        k: key.to_string(),
        e: expires_at_unix,
        m: method.to_string(),
        transform: transform.unwrap_or_default(),
    };
    let json = serde_json::to_vec(&payload)
        .map_err(|e| RuntimeError::invalid_input(format!("failed to encode token: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| RuntimeError::capability_unavailable(format!("invalid signing key: {e}")))?;
    mac.update(&json);
    let tag = mac.finalize().into_bytes();

    let mut sealed = json;
    sealed.extend_from_slice(&tag);
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Build the full signed URL string for a sealed token.
#[must_use]
pub fn build_url(base_url: &str, token: &str) -> String {
    format!("{}{}?token={}", base_url.trim_end_matches('/'), SIGNED_URL_PATH, token)
}

/// Verify and decode a token, returning the full record including any
/// embedded transform intent.
///
/// Rejects tokens shorter than 33 bytes once decoded, tokens whose tag
/// fails constant-time verification, and tokens whose `expires_at` has
/// already passed.
pub fn validate(secret: &[u8], token: &str, now_unix: i64) -> Result<SignedUrlRecord, RuntimeError> {
    let decoded = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| RuntimeError::invalid_input("malformed signed url token"))?;

    if decoded.len() < 33 {
        return Err(RuntimeError::invalid_input("malformed signed url token"));
    }

    let (json, tag) = decoded.split_at(decoded.len() - 32);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| RuntimeError::capability_unavailable(format!("invalid signing key: {e}")))?;
    mac.update(json);
    mac.verify_slice(tag)
        .map_err(|_| RuntimeError::invalid_input("signed url token failed verification"))?;

    let payload: TokenPayload = serde_json::from_slice(json)
        .map_err(|_| RuntimeError::invalid_input("signed url token payload is corrupt"))?;

    if payload.e < now_unix {
        return Err(RuntimeError::invalid_input("signed url token has expired"));
    }

    Ok(SignedUrlRecord {
        bucket: payload.b,
        key: payload.k,
        method: payload.m,
        expires_at: payload.e,
        transform: if payload.transform == SignedUrlTransform::default() {
            None
        } else {
            Some(payload.transform)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-signing-secret";

    #[test]
    fn round_trips_bucket_key_method() {
        let token = generate(SECRET, "b", "a/b.png", "GET", 1_000_000_000, None).unwrap();
        let record = validate(SECRET, &token, 999_999_999).unwrap();
        assert_eq!(record.bucket, "b");
        assert_eq!(record.key, "a/b.png");
        assert_eq!(record.method, "GET");
    }

    #[test]
    fn round_trips_transform_params() {
        let transform = SignedUrlTransform {
            width: Some(800),
            height: None,
            format: Some("webp".to_string()),
            quality: Some(85),
            fit: None,
        };
        let token = generate(
            SECRET,
            "b",
            "a/b.png",
            "GET",
            1_000_000_000,
            Some(transform.clone()),
        )
        .unwrap();
        let record = validate(SECRET, &token, 0).unwrap();
        assert_eq!(record.transform, Some(transform));
    }

    #[test]
    fn flipping_a_byte_fails_verification() {
        let token = generate(SECRET, "b", "a/b.png", "GET", 1_000_000_000, None).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(validate(SECRET, &tampered, 0).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = generate(SECRET, "b", "a/b.png", "GET", 100, None).unwrap();
        assert!(validate(SECRET, &token, 1_000).is_err());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let token = generate(SECRET, "b", "a/b.png", "GET", 1_000_000_000, None).unwrap();
        assert!(validate(b"wrong-secret", &token, 0).is_err());
    }

    #[test]
    fn too_short_payload_is_rejected() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 10]);
        assert!(validate(SECRET, &short, 0).is_err());
    }
}
