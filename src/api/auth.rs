// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login endpoint.
//!
//! The lockout guard runs before credential verification, so a locked
//! identifier is rejected even with correct credentials and the response
//! never reveals whether they were correct.

use axum::{
    extract::State,
    http::request::Parts,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::error::ApiError;
use crate::guards::identity::client_ip;
use crate::guards::GuardError;
use crate::models::{LoginRequest, LoginResponse};
use crate::state::AppState;

/// Authenticate with primary credentials.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account temporarily locked")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    parts: Parts,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, Response> {
    let identifier = body.identifier.trim();
    if identifier.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("identifier and password are required").into_response());
    }
    let ip = client_ip(&parts.extensions, &parts.headers);

    let decision = state.lockout.check_login_allowed(identifier);
    if !decision.allowed {
        return Err(match decision.locked_until {
            Some(locked_until) => GuardError::AccountLocked { locked_until }.into_response(),
            None => ApiError::forbidden("too many failed login attempts").into_response(),
        });
    }

    match state.credentials.verify(identifier, &body.password).await {
        Ok(Some(user_id)) => {
            state.lockout.record_success(identifier);
            info!(user_id, "login succeeded");
            Ok(Json(LoginResponse { user_id }))
        }
        Ok(None) => {
            state.lockout.record_failure(identifier, ip.as_deref());
            Err(ApiError::unauthorized("invalid credentials").into_response())
        }
        Err(e) => Err(ApiError::internal(e.to_string()).into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::{CredentialError, CredentialVerifier};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use axum::http::Request;
    use std::sync::Arc;

    struct FixedVerifier;

    #[async_trait]
    impl CredentialVerifier for FixedVerifier {
        async fn verify(
            &self,
            identifier: &str,
            password: &str,
        ) -> Result<Option<String>, CredentialError> {
            if identifier == "user@example.com" && password == "correct horse" {
                Ok(Some("user_1".to_string()))
            } else {
                Ok(None)
            }
        }
    }

    fn state() -> AppState {
        AppState::with_parts(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(crate::guards::StaticMfaValidator::Disabled),
            Arc::new(FixedVerifier),
        )
    }

    fn parts() -> Parts {
        let (parts, ()) = Request::builder().body(()).unwrap().into_parts();
        parts
    }

    fn request(identifier: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn valid_credentials_log_in() {
        let Json(response) = login(
            State(state()),
            parts(),
            request("user@example.com", "correct horse"),
        )
        .await
        .unwrap();
        assert_eq!(response.user_id, "user_1");
    }

    #[tokio::test]
    async fn invalid_credentials_are_unauthorized() {
        let response = login(
            State(state()),
            parts(),
            request("user@example.com", "wrong"),
        )
        .await;
        let err = response.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lockout_rejects_even_correct_credentials() {
        let state = state();
        for _ in 0..state.config.lockout_threshold {
            let _ = login(
                State(state.clone()),
                parts(),
                request("user@example.com", "wrong"),
            )
            .await;
        }

        let response = login(
            State(state),
            parts(),
            request("user@example.com", "correct horse"),
        )
        .await;
        let err = response.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let state = state();
        // One failure short of the threshold, then a success.
        for _ in 0..state.config.lockout_threshold - 1 {
            let _ = login(
                State(state.clone()),
                parts(),
                request("user@example.com", "wrong"),
            )
            .await;
        }
        login(
            State(state.clone()),
            parts(),
            request("user@example.com", "correct horse"),
        )
        .await
        .unwrap();

        // A single further failure must not lock.
        let _ = login(
            State(state.clone()),
            parts(),
            request("user@example.com", "wrong"),
        )
        .await;
        let response = login(
            State(state),
            parts(),
            request("user@example.com", "correct horse"),
        )
        .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn blank_identifier_is_a_bad_request() {
        let response = login(State(state()), parts(), request("  ", "pw")).await;
        let err = response.err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
