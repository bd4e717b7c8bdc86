// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! MFA gate.
//!
//! The validator is an abstract capability so deployments can plug in
//! TOTP, SMS, or a provider API. The gate only decides pass/reject and
//! keeps the two rejection reasons distinguishable: `MFA_REQUIRED` means
//! "prompt for a code", `MFA_INVALID` means "the code was wrong".

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::identity::{client_ip, identity_from_request};
use super::GuardError;
use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::state::AppState;
use crate::store::SecurityEventStore;
use crate::webhooks::signature::constant_time_eq;

/// Header carrying the second-factor token.
pub const MFA_TOKEN_HEADER: &str = "x-mfa-token";

#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("MFA validator unavailable: {0}")]
    Unavailable(String),
}

/// Second-factor verification capability.
#[async_trait]
pub trait MfaValidator: Send + Sync {
    /// Whether the user has MFA enabled at all.
    async fn is_enabled(&self, user_id: &str) -> Result<bool, MfaError>;
    /// Verify a supplied token for the user.
    async fn verify(&self, user_id: &str, token: &str) -> Result<bool, MfaError>;
}

/// Fixed-secret validator. `Disabled` passes everyone through; `Enabled`
/// compares tokens constant-time against the shared secret.
pub enum StaticMfaValidator {
    Disabled,
    Enabled { secret: String },
}

#[async_trait]
impl MfaValidator for StaticMfaValidator {
    async fn is_enabled(&self, _user_id: &str) -> Result<bool, MfaError> {
        Ok(matches!(self, StaticMfaValidator::Enabled { .. }))
    }

    async fn verify(&self, _user_id: &str, token: &str) -> Result<bool, MfaError> {
        match self {
            StaticMfaValidator::Disabled => Ok(false),
            StaticMfaValidator::Enabled { secret } => {
                Ok(constant_time_eq(token.as_bytes(), secret.as_bytes()))
            }
        }
    }
}

pub struct MfaGate {
    validator: Arc<dyn MfaValidator>,
    events: Arc<dyn SecurityEventStore>,
    enforced: bool,
}

impl MfaGate {
    pub fn new(
        validator: Arc<dyn MfaValidator>,
        events: Arc<dyn SecurityEventStore>,
        enforced: bool,
    ) -> Self {
        Self {
            validator,
            events,
            enforced,
        }
    }

    /// Enforce the second factor for a user.
    ///
    /// Users without MFA enabled pass unconditionally. Validator outages
    /// fail closed: MFA is part of authentication, not an advisory check.
    pub async fn require_mfa(
        &self,
        user_id: &str,
        token: Option<&str>,
        ip: Option<&str>,
    ) -> Result<(), GuardError> {
        if !self.enforced {
            return Ok(());
        }

        let enabled = self
            .validator
            .is_enabled(user_id)
            .await
            .map_err(|e| GuardError::Internal(e.to_string()))?;
        if !enabled {
            return Ok(());
        }

        let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
            return Err(GuardError::MfaRequired);
        };

        let valid = self
            .validator
            .verify(user_id, token)
            .await
            .map_err(|e| GuardError::Internal(e.to_string()))?;
        if valid {
            Ok(())
        } else {
            let mut event = SecurityEvent::new(SecurityEventType::MfaFailure, Severity::Warning)
                .with_user(user_id);
            if let Some(ip) = ip {
                event = event.with_ip(ip);
            }
            if let Err(e) = self.events.append_event(event) {
                error!(user_id, error = %e, "failed to append MFA failure event");
            }
            Err(GuardError::MfaInvalid)
        }
    }
}

/// MFA middleware over the `X-MFA-Token` header.
pub async fn mfa_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity) = identity_from_request(&request) else {
        return GuardError::Unauthenticated.into_response();
    };
    let token = request
        .headers()
        .get(MFA_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip = client_ip(request.extensions(), request.headers());

    match state
        .mfa
        .require_mfa(&identity.user_id, token.as_deref(), ip.as_deref())
        .await
    {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
