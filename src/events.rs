// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only security event log.
//!
//! Every guard writes an event here on notable transitions (IP added,
//! lockout triggered, MFA failure, withdrawal confirmed). Events are never
//! mutated or deleted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Types of security-relevant transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    // Device events
    DeviceRegistered,
    DeviceRevoked,
    HighRiskDevice,

    // IP allowlist events
    IpAdded,
    IpVerified,
    IpRemoved,
    IpRejected,

    // Login events
    LoginLockout,
    LoginFailure,

    // MFA events
    MfaFailure,

    // Withdrawal events
    WithdrawalConfirmed,

    // Webhook events
    WebhookRejected,

    // Admin events
    AdminBootstrapped,
}

/// Event severity for triage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityEvent {
    pub id: String,
    /// User who triggered the event, when attributable.
    pub user_id: Option<String>,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub ip_address: Option<String>,
    /// Free-form context (withdrawal id, amount, provider, ...).
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, severity: Severity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            event_type,
            severity,
            ip_address: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_fields() {
        let event = SecurityEvent::new(SecurityEventType::WithdrawalConfirmed, Severity::Info)
            .with_user("user_1")
            .with_ip("203.0.113.9")
            .with_detail("withdrawal_id", "wd_42")
            .with_detail("amount", "250.00");

        assert_eq!(event.user_id, Some("user_1".to_string()));
        assert_eq!(event.ip_address, Some("203.0.113.9".to_string()));
        assert_eq!(event.metadata.get("withdrawal_id").unwrap(), "wd_42");
        assert_eq!(event.severity, Severity::Info);
        assert!(!event.id.is_empty());
    }
}
