// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device trust engine.
//!
//! Fingerprints each request, auto-registers unseen devices (never
//! implicitly trusted as "known"), and computes an advisory risk score.
//! Device checks degrade to allow-unscored when the store is unavailable;
//! the one hard rule is that a revoked device is denied outright.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, warn};
use uuid::Uuid;

use super::identity::{client_ip, identity_from_request};
use super::GuardError;
use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::models::{Device, DeviceCheck};
use crate::state::AppState;
use crate::store::{DeviceStore, SecurityEventStore, StoreResult};

/// Risk score above which a device is surfaced as high risk.
pub const RISK_THRESHOLD: f64 = 0.7;

/// Requests per minute above which the velocity factor fires.
const HIGH_VELOCITY_RPM: u32 = 60;

const NEW_DEVICE_WEIGHT: f64 = 0.4;
const NEW_IP_WEIGHT: f64 = 0.25;
const HIGH_VELOCITY_WEIGHT: f64 = 0.35;

/// Client-declared fingerprint, overriding derivation.
pub const FINGERPRINT_HEADER: &str = "x-device-fingerprint";
/// Client-declared device name used at registration.
pub const DEVICE_NAME_HEADER: &str = "x-device-name";
const SCREEN_HEADER: &str = "x-screen-resolution";
const TIMEZONE_HEADER: &str = "x-timezone";

const DEFAULT_DEVICE_NAME: &str = "Unrecognized device";

/// Derive a deterministic fingerprint from request attributes.
///
/// Inputs are joined with a separator before hashing so that materially
/// different clients cannot collide by shifting content between fields.
pub fn derive_fingerprint(
    user_agent: &str,
    accept_language: &str,
    screen: &str,
    timezone: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [user_agent, accept_language, screen, timezone] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

pub struct DeviceTrustEngine {
    devices: Arc<dyn DeviceStore>,
    events: Arc<dyn SecurityEventStore>,
}

impl DeviceTrustEngine {
    pub fn new(devices: Arc<dyn DeviceStore>, events: Arc<dyn SecurityEventStore>) -> Self {
        Self { devices, events }
    }

    /// Check the device behind a request, auto-registering unseen
    /// fingerprints. Advisory: store failures yield an unscored pass.
    pub fn check_device(&self, user_id: &str, fingerprint: &str, ip: &str) -> DeviceCheck {
        let velocity = self
            .devices
            .record_sighting(user_id, Utc::now())
            .unwrap_or(0);

        let known = match self.devices.find_device(user_id, fingerprint) {
            Ok(known) => known,
            Err(e) => {
                warn!(user_id, error = %e, "device lookup failed, passing unscored");
                return DeviceCheck::unscored();
            }
        };

        let ip_is_new = match self.ip_seen_before(user_id, ip, known.as_ref()) {
            Ok(seen) => !seen,
            Err(_) => false,
        };

        let mut score = 0.0;
        let mut factors = Vec::new();
        if known.is_none() {
            score += NEW_DEVICE_WEIGHT;
            factors.push("new_device".to_string());
        }
        if ip_is_new {
            score += NEW_IP_WEIGHT;
            factors.push("new_ip".to_string());
        }
        if velocity > HIGH_VELOCITY_RPM {
            score += HIGH_VELOCITY_WEIGHT;
            factors.push("high_velocity".to_string());
        }
        let score = score.min(1.0);

        let check = match known {
            Some(device) => {
                if let Err(e) =
                    self.devices
                        .touch_device(&device.id, ip, score, &factors, Utc::now())
                {
                    warn!(user_id, device_id = %device.id, error = %e, "device touch failed");
                }
                DeviceCheck {
                    is_known_device: true,
                    risk_score: score,
                    risk_factors: factors,
                    high_risk: score > RISK_THRESHOLD,
                    device_id: Some(device.id.clone()),
                    revoked: device.revoked,
                }
            }
            None => {
                let device_id = match self.auto_register(user_id, fingerprint, ip, score, &factors)
                {
                    Ok(device) => Some(device.id),
                    Err(e) => {
                        warn!(user_id, error = %e, "device auto-registration failed");
                        None
                    }
                };
                DeviceCheck {
                    is_known_device: false,
                    risk_score: score,
                    risk_factors: factors,
                    high_risk: score > RISK_THRESHOLD,
                    device_id,
                    revoked: false,
                }
            }
        };

        if check.high_risk {
            warn!(
                user_id,
                risk_score = check.risk_score,
                factors = ?check.risk_factors,
                "high risk device"
            );
            let _ = self.events.append_event(
                SecurityEvent::new(SecurityEventType::HighRiskDevice, Severity::Warning)
                    .with_user(user_id)
                    .with_ip(ip)
                    .with_detail("risk_score", format!("{:.2}", check.risk_score))
                    .with_detail("risk_factors", check.risk_factors.join(",")),
            );
        }

        check
    }

    /// Explicitly register (or name) a device for a user.
    pub fn register_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
    ) -> StoreResult<Device> {
        if let Some(existing) = self.devices.find_device(user_id, fingerprint)? {
            return Ok(existing);
        }
        let device = self.insert_device(user_id, fingerprint, name, ip, 0.0, &[])?;
        Ok(device)
    }

    pub fn list_devices(&self, user_id: &str) -> StoreResult<Vec<Device>> {
        self.devices.list_devices(user_id)
    }

    /// Revoke a device: access from it is denied going forward. The
    /// record is kept for audit.
    pub fn revoke_device(
        &self,
        user_id: &str,
        device_id: &str,
        ip: Option<&str>,
    ) -> StoreResult<crate::store::OwnedMutation> {
        let outcome = self.devices.revoke_device(user_id, device_id)?;
        if outcome == crate::store::OwnedMutation::Applied {
            let mut event = SecurityEvent::new(SecurityEventType::DeviceRevoked, Severity::Warning)
                .with_user(user_id)
                .with_detail("device_id", device_id);
            if let Some(ip) = ip {
                event = event.with_ip(ip);
            }
            if let Err(e) = self.events.append_event(event) {
                error!(user_id, error = %e, "failed to append device revocation event");
            }
        }
        Ok(outcome)
    }

    fn ip_seen_before(
        &self,
        user_id: &str,
        ip: &str,
        known: Option<&Device>,
    ) -> StoreResult<bool> {
        if known.is_some_and(|d| d.ip_address == ip) {
            return Ok(true);
        }
        Ok(self
            .devices
            .list_devices(user_id)?
            .iter()
            .any(|d| d.ip_address == ip))
    }

    fn auto_register(
        &self,
        user_id: &str,
        fingerprint: &str,
        ip: &str,
        score: f64,
        factors: &[String],
    ) -> StoreResult<Device> {
        self.insert_device(user_id, fingerprint, DEFAULT_DEVICE_NAME, ip, score, factors)
    }

    fn insert_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        name: &str,
        ip: &str,
        score: f64,
        factors: &[String],
    ) -> StoreResult<Device> {
        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            ip_address: ip.to_string(),
            name: name.to_string(),
            // Never implicitly trusted; trust is a separate user action.
            is_trusted: false,
            revoked: false,
            risk_score: score,
            risk_factors: factors.to_vec(),
            first_seen_at: now,
            last_seen_at: now,
        };
        self.devices.insert_device(device.clone())?;
        let _ = self.events.append_event(
            SecurityEvent::new(SecurityEventType::DeviceRegistered, Severity::Info)
                .with_user(user_id)
                .with_ip(ip)
                .with_detail("device_id", device.id.clone())
                .with_detail("device_name", name),
        );
        Ok(device)
    }
}

/// Resolve the fingerprint for a request: explicit header first, derived
/// attributes otherwise.
pub fn request_fingerprint(request: &Request) -> String {
    fingerprint_from_headers(request.headers())
}

/// Header-only variant for handlers that no longer hold the full request.
pub fn fingerprint_from_headers(headers: &axum::http::HeaderMap) -> String {
    if let Some(explicit) = headers
        .get(FINGERPRINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return explicit.to_string();
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };
    derive_fingerprint(
        header("user-agent"),
        header("accept-language"),
        header(SCREEN_HEADER),
        header(TIMEZONE_HEADER),
    )
}

/// Advisory device middleware: attaches a `DeviceCheck` to the request
/// for downstream consumers. Revoked devices are the one hard rejection.
pub async fn device_trust_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(identity) = identity_from_request(&request) else {
        return GuardError::Unauthenticated.into_response();
    };

    let fingerprint = request_fingerprint(&request);
    let ip = client_ip(request.extensions(), request.headers())
        .unwrap_or_else(|| "unknown".to_string());

    let check = state
        .device_engine
        .check_device(&identity.user_id, &fingerprint, &ip);

    if check.revoked {
        return GuardError::DeviceRevoked.into_response();
    }

    request.extensions_mut().insert(check);
    next.run(request).await
}
