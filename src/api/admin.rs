// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::state::AppState;
use crate::store::SecurityEventStore;
use crate::webhooks::constant_time_eq;

#[derive(Debug, Deserialize, ToSchema)]
pub struct BootstrapRequest {
    /// Deployment bootstrap token from the environment.
    pub token: String,
    /// Identifier of the account to promote to the first admin.
    pub admin_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BootstrapResponse {
    pub status: String,
    pub admin_id: String,
}

/// Privileged first-admin creation.
///
/// Gated by a constant-time comparison against the deployment bootstrap
/// token and usable exactly once per process. When no token is configured
/// the endpoint does not exist as far as callers can tell.
#[utoipa::path(
    post,
    path = "/v1/admin/bootstrap",
    tag = "Admin",
    request_body = BootstrapRequest,
    responses(
        (status = 201, description = "First admin created", body = BootstrapResponse),
        (status = 401, description = "Bad bootstrap token"),
        (status = 404, description = "Bootstrap not enabled"),
        (status = 409, description = "Already bootstrapped")
    )
)]
pub async fn bootstrap(
    State(state): State<AppState>,
    Json(body): Json<BootstrapRequest>,
) -> Result<(StatusCode, Json<BootstrapResponse>), ApiError> {
    let Some(expected) = state.config.bootstrap_token.as_deref() else {
        return Err(ApiError::not_found("not found"));
    };
    if !constant_time_eq(body.token.as_bytes(), expected.as_bytes()) {
        return Err(ApiError::unauthorized("invalid bootstrap token"));
    }

    let admin_id = body.admin_id.trim();
    if admin_id.is_empty() {
        return Err(ApiError::bad_request("admin_id is required"));
    }

    let claimed = state
        .store
        .try_mark_bootstrapped()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !claimed {
        return Err(ApiError::conflict("deployment is already bootstrapped"));
    }

    info!(admin_id, "first admin bootstrapped");
    let _ = state.store.append_event(
        SecurityEvent::new(SecurityEventType::AdminBootstrapped, Severity::Critical)
            .with_user(admin_id),
    );

    Ok((
        StatusCode::CREATED,
        Json(BootstrapResponse {
            status: "bootstrapped".to_string(),
            admin_id: admin_id.to_string(),
        }),
    ))
}
