// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain models for the trust boundary layer.
//!
//! Persistence for these records is an external concern; the structs here
//! are what the guards and the stores exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A device observed for a user, keyed by derived fingerprint.
///
/// Devices are created on first sighting and never hard-deleted; revocation
/// marks the record and denies access from it going forward.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    pub fingerprint: String,
    pub ip_address: String,
    pub name: String,
    /// Granted by an explicit user action, never at registration.
    pub is_trusted: bool,
    /// Revoked devices are denied outright and kept for audit.
    pub revoked: bool,
    /// Derived risk score in [0, 1]. Never settable by a client.
    pub risk_score: f64,
    pub risk_factors: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Outcome of a device trust check, attached to the request for
/// downstream consumers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceCheck {
    pub is_known_device: bool,
    pub risk_score: f64,
    pub risk_factors: Vec<String>,
    /// True when `risk_score` exceeds the high-risk threshold. Downstream
    /// handlers may demand a step-up action (MFA, withdrawal confirmation).
    pub high_risk: bool,
    /// Set when the check resolved to a stored device record.
    pub device_id: Option<String>,
    /// True when the matched device has been revoked; revoked devices are
    /// denied outright by the device middleware.
    #[serde(skip)]
    pub revoked: bool,
}

impl DeviceCheck {
    /// Advisory fallback when the device lookup itself failed: allow,
    /// unscored.
    pub fn unscored() -> Self {
        Self {
            is_known_device: false,
            risk_score: 0.0,
            risk_factors: Vec::new(),
            high_risk: false,
            device_id: None,
            revoked: false,
        }
    }
}

/// Lifecycle of an IP allowlist entry. Pending entries never grant access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IpEntryStatus {
    Pending,
    Verified,
}

/// A user-managed IP allowlist entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpWhitelistEntry {
    pub id: String,
    pub user_id: String,
    pub ip_address: String,
    pub label: String,
    pub status: IpEntryStatus,
    pub created_at: DateTime<Utc>,
}

/// Failed-login tracking per identifier (e.g. email).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginAttemptRecord {
    pub identifier: String,
    pub failure_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginAttemptRecord {
    /// Whether the identifier is locked out at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }
}

/// Single-use step-up confirmation for a high-risk withdrawal.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WithdrawalConfirmation {
    /// Opaque single-use token handed to the client.
    pub token: String,
    pub withdrawal_id: String,
    pub user_id: String,
    pub amount: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

/// Processing status of an inbound webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Processing,
    Processed,
    Failed,
}

/// Dedupe record for a provider event, keyed by provider transaction id or
/// nonce. Guarantees at-most-once processing under concurrent duplicate
/// deliveries.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookDelivery {
    pub event_key: String,
    pub provider: String,
    pub status: DeliveryStatus,
    pub received_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

// --- Request/response DTOs ---

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddIpRequest {
    pub ip_address: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterDeviceRequest {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConfirmWithdrawalRequest {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lockout_active_only_before_expiry() {
        let now = Utc::now();
        let record = LoginAttemptRecord {
            identifier: "user@example.com".into(),
            failure_count: 5,
            locked_until: Some(now + Duration::minutes(15)),
        };
        assert!(record.is_locked(now));
        assert!(!record.is_locked(now + Duration::minutes(16)));
    }

    #[test]
    fn no_lockout_when_unset() {
        let record = LoginAttemptRecord {
            identifier: "user@example.com".into(),
            failure_count: 2,
            locked_until: None,
        };
        assert!(!record.is_locked(Utc::now()));
    }
}
