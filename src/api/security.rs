// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Self-service security surface: IP allowlist entries, devices, and the
//! user's own audit trail.

use axum::{
    extract::{Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::events::SecurityEvent;
use crate::guards::device::fingerprint_from_headers;
use crate::guards::identity::client_ip;
use crate::guards::Identity;
use crate::models::{AddIpRequest, Device, IpWhitelistEntry, RegisterDeviceRequest};
use crate::state::AppState;
use crate::store::{OwnedMutation, SecurityEventStore};

const DEFAULT_EVENT_LIMIT: usize = 50;
const MAX_EVENT_LIMIT: usize = 200;

fn map_mutation(outcome: OwnedMutation, subject: &str) -> Result<StatusCode, ApiError> {
    match outcome {
        OwnedMutation::Applied => Ok(StatusCode::NO_CONTENT),
        OwnedMutation::NotFound => Err(ApiError::not_found(format!("{subject} not found"))),
        OwnedMutation::NotOwner => {
            Err(ApiError::forbidden(format!("{subject} belongs to another user")))
        }
    }
}

/// List the caller's IP allowlist entries.
#[utoipa::path(
    get,
    path = "/v1/security/ips",
    tag = "Security",
    responses(
        (status = 200, description = "Allowlist entries", body = [IpWhitelistEntry])
    )
)]
pub async fn list_ips(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<IpWhitelistEntry>>, ApiError> {
    let entries = state
        .ip_guard
        .list_ips(&identity.user_id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(entries))
}

/// Add an IP allowlist entry. Entries start pending and grant nothing
/// until verified.
#[utoipa::path(
    post,
    path = "/v1/security/ips",
    tag = "Security",
    request_body = AddIpRequest,
    responses(
        (status = 201, description = "Entry created pending verification", body = IpWhitelistEntry),
        (status = 400, description = "Not a valid IP address")
    )
)]
pub async fn add_ip(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<AddIpRequest>,
) -> Result<(StatusCode, Json<IpWhitelistEntry>), ApiError> {
    let ip: std::net::IpAddr = body
        .ip_address
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("ip_address is not a valid IP address"))?;

    let entry = state
        .ip_guard
        .add_ip(&identity.user_id, &ip.to_string(), body.label.as_deref())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Verify a pending allowlist entry.
#[utoipa::path(
    post,
    path = "/v1/security/ips/{entry_id}/verify",
    tag = "Security",
    params(("entry_id" = String, Path, description = "Allowlist entry id")),
    responses(
        (status = 204, description = "Entry verified"),
        (status = 403, description = "Entry belongs to another user"),
        (status = 404, description = "Entry not found")
    )
)]
pub async fn verify_ip(
    State(state): State<AppState>,
    identity: Identity,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let outcome = state
        .ip_guard
        .verify_ip(&identity.user_id, &entry_id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    map_mutation(outcome, "allowlist entry")
}

/// Remove an allowlist entry.
#[utoipa::path(
    delete,
    path = "/v1/security/ips/{entry_id}",
    tag = "Security",
    params(("entry_id" = String, Path, description = "Allowlist entry id")),
    responses(
        (status = 204, description = "Entry removed"),
        (status = 403, description = "Entry belongs to another user"),
        (status = 404, description = "Entry not found")
    )
)]
pub async fn remove_ip(
    State(state): State<AppState>,
    identity: Identity,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let outcome = state
        .ip_guard
        .remove_ip(&identity.user_id, &entry_id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    map_mutation(outcome, "allowlist entry")
}

/// List the caller's devices.
#[utoipa::path(
    get,
    path = "/v1/security/devices",
    tag = "Security",
    responses(
        (status = 200, description = "Known devices", body = [Device])
    )
)]
pub async fn list_devices(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = state
        .device_engine
        .list_devices(&identity.user_id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(devices))
}

/// Explicitly register (and name) the current device.
#[utoipa::path(
    post,
    path = "/v1/security/devices",
    tag = "Security",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 201, description = "Device registered", body = Device)
    )
)]
pub async fn register_device(
    State(state): State<AppState>,
    parts: Parts,
    identity: Identity,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let fingerprint = body
        .fingerprint
        .as_deref()
        .map(str::trim)
        .filter(|fp| !fp.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fingerprint_from_headers(&parts.headers));
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Unnamed device");
    let ip = client_ip(&parts.extensions, &parts.headers)
        .unwrap_or_else(|| "unknown".to_string());

    let device = state
        .device_engine
        .register_device(&identity.user_id, &fingerprint, name, &ip)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// Revoke a device. Access from it is denied going forward.
#[utoipa::path(
    post,
    path = "/v1/security/devices/{device_id}/revoke",
    tag = "Security",
    params(("device_id" = String, Path, description = "Device id")),
    responses(
        (status = 204, description = "Device revoked"),
        (status = 403, description = "Device belongs to another user"),
        (status = 404, description = "Device not found")
    )
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    parts: Parts,
    identity: Identity,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ip = client_ip(&parts.extensions, &parts.headers);
    let outcome = state
        .device_engine
        .revoke_device(&identity.user_id, &device_id, ip.as_deref())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    map_mutation(outcome, "device")
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Maximum number of events to return, newest first.
    pub limit: Option<usize>,
}

/// The caller's security event trail, newest first.
#[utoipa::path(
    get,
    path = "/v1/security/events",
    tag = "Security",
    params(EventsQuery),
    responses(
        (status = 200, description = "Recent security events", body = [SecurityEvent])
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<SecurityEvent>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    let events = state
        .store
        .events_for_user(&identity.user_id, limit)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(events))
}
