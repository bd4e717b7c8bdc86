// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Constant-time HMAC verification for inbound webhooks and bootstrap
//! tokens.
//!
//! Verification runs over the raw request body exactly as received, before
//! any JSON decoding. Signature comparison never uses ordinary equality.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookProviderConfig;

type HmacSha256 = Hmac<Sha256>;

/// Prefixes some providers put in front of the hex-encoded signature.
const KNOWN_PREFIXES: &[&str] = &["sha256=", "hmac-sha256="];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook signature header is missing")]
    MissingSignature,

    #[error("webhook signature does not match payload")]
    SignatureMismatch,

    #[error("no webhook secret configured for this endpoint")]
    MissingSecret,
}

/// Verify `provided` against HMAC-SHA256(`secret`, `payload`).
///
/// Known prefixes are stripped from the provided value first. The encoded
/// signatures are compared constant-time after an exact-length check.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    provided: &str,
) -> Result<(), SignatureError> {
    let provided = strip_known_prefixes(provided.trim());
    if provided.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    // HmacSha256::new_from_slice accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::SignatureMismatch)?;
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(provided.to_ascii_lowercase().as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::SignatureMismatch)
    }
}

/// Apply the per-endpoint verification policy to a delivery.
///
/// No secret configured means every delivery is rejected (fail closed); the
/// skip flag downgrades that to fail-open and is only honored in
/// non-production configurations (enforced at config load).
pub fn verify_delivery(
    config: &WebhookProviderConfig,
    payload: &[u8],
    provided: Option<&str>,
) -> Result<(), SignatureError> {
    if config.skip_verification {
        return Ok(());
    }
    let Some(secret) = config.secret.as_deref() else {
        return Err(SignatureError::MissingSecret);
    };
    let provided = provided.ok_or(SignatureError::MissingSignature)?;
    verify_signature(secret, payload, provided)
}

fn strip_known_prefixes(value: &str) -> &str {
    for prefix in KNOWN_PREFIXES {
        if let Some(stripped) = value.strip_prefix(prefix) {
            return stripped;
        }
    }
    value
}

/// Constant-time byte comparison: exact-length check first, then an
/// XOR-accumulate over every byte regardless of where the first mismatch
/// sits.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
