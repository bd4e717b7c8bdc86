// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guard rejection errors.
//!
//! Business handlers never interpret guard internals; they see either a
//! pass (request continues with attached context) or one of these
//! structured rejections with a stable machine-readable code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Rejection raised by a trust boundary guard.
#[derive(Debug)]
pub enum GuardError {
    /// Login lockout is active for the identifier.
    AccountLocked { locked_until: DateTime<Utc> },
    /// MFA is enabled for the user but no token was supplied.
    MfaRequired,
    /// A supplied MFA token failed verification.
    MfaInvalid,
    /// Caller IP does not match a verified allowlist entry.
    IpNotWhitelisted,
    /// The request came from a revoked device.
    DeviceRevoked,
    /// No authenticated identity on the request.
    Unauthenticated,
    /// Internal guard failure.
    Internal(String),
}

#[derive(Serialize)]
struct GuardErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_until: Option<DateTime<Utc>>,
}

impl GuardError {
    /// Stable machine-readable code; clients branch on this, not on the
    /// message.
    pub fn error_code(&self) -> &'static str {
        match self {
            GuardError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            GuardError::MfaRequired => "MFA_REQUIRED",
            GuardError::MfaInvalid => "MFA_INVALID",
            GuardError::IpNotWhitelisted => "IP_NOT_WHITELISTED",
            GuardError::DeviceRevoked => "DEVICE_REVOKED",
            GuardError::Unauthenticated => "UNAUTHENTICATED",
            GuardError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GuardError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GuardError::AccountLocked { .. }
            | GuardError::MfaRequired
            | GuardError::MfaInvalid
            | GuardError::IpNotWhitelisted
            | GuardError::DeviceRevoked => StatusCode::FORBIDDEN,
            GuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::AccountLocked { locked_until } => {
                write!(f, "Account is temporarily locked until {locked_until}")
            }
            GuardError::MfaRequired => write!(f, "A multi-factor token is required"),
            GuardError::MfaInvalid => write!(f, "The supplied multi-factor token is invalid"),
            GuardError::IpNotWhitelisted => {
                write!(f, "Request IP is not on the verified allowlist")
            }
            GuardError::DeviceRevoked => write!(f, "This device has been revoked"),
            GuardError::Unauthenticated => write!(f, "Authentication is required"),
            GuardError::Internal(msg) => write!(f, "Internal guard error: {msg}"),
        }
    }
}

impl std::error::Error for GuardError {}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let locked_until = match &self {
            GuardError::AccountLocked { locked_until } => Some(*locked_until),
            _ => None,
        };
        let status = self.status_code();
        let body = Json(GuardErrorBody {
            code: self.error_code().to_string(),
            message: self.to_string(),
            locked_until,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn mfa_variants_are_distinguishable() {
        let required = GuardError::MfaRequired.into_response();
        assert_eq!(required.status(), StatusCode::FORBIDDEN);
        let body_bytes = to_bytes(required.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["code"], "MFA_REQUIRED");

        let invalid = GuardError::MfaInvalid.into_response();
        let body_bytes = to_bytes(invalid.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["code"], "MFA_INVALID");
    }

    #[tokio::test]
    async fn locked_response_surfaces_expiry() {
        let until = Utc::now() + chrono::Duration::minutes(15);
        let response = GuardError::AccountLocked {
            locked_until: until,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["code"], "ACCOUNT_LOCKED");
        assert!(body["locked_until"].is_string());
    }

    #[test]
    fn unauthenticated_is_401() {
        assert_eq!(
            GuardError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
