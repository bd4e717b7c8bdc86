// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::request::Parts, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::guards::identity::client_ip;
use crate::guards::Identity;
use crate::models::ConfirmWithdrawalRequest;
use crate::state::AppState;
use crate::withdrawals::ConfirmationError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmWithdrawalResponse {
    pub status: String,
    pub withdrawal_id: String,
    pub amount: String,
}

/// Redeem a single-use withdrawal confirmation token.
#[utoipa::path(
    post,
    path = "/v1/withdrawals/confirm",
    tag = "Withdrawals",
    request_body = ConfirmWithdrawalRequest,
    responses(
        (status = 200, description = "Withdrawal confirmed", body = ConfirmWithdrawalResponse),
        (status = 404, description = "Unknown token"),
        (status = 403, description = "Token belongs to another user"),
        (status = 409, description = "Token already used"),
        (status = 422, description = "Token expired")
    )
)]
pub async fn confirm_withdrawal(
    State(state): State<AppState>,
    parts: Parts,
    identity: Identity,
    Json(body): Json<ConfirmWithdrawalRequest>,
) -> Result<Json<ConfirmWithdrawalResponse>, ApiError> {
    let ip = client_ip(&parts.extensions, &parts.headers);
    let confirmation = state
        .withdrawals
        .verify_confirmation(body.token.trim(), &identity.user_id, ip.as_deref())
        .map_err(|e| match e {
            ConfirmationError::NotFound => ApiError::not_found("confirmation token not found"),
            ConfirmationError::NotOwner => {
                ApiError::forbidden("confirmation token belongs to another user")
            }
            ConfirmationError::AlreadyConsumed => {
                ApiError::conflict("confirmation token was already used")
            }
            ConfirmationError::Expired => {
                ApiError::unprocessable("confirmation token has expired")
            }
            ConfirmationError::Store(e) => ApiError::internal(e.to_string()),
        })?;

    Ok(Json(ConfirmWithdrawalResponse {
        status: "confirmed".to_string(),
        withdrawal_id: confirmation.withdrawal_id,
        amount: confirmation.amount,
    }))
}
