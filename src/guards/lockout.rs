// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login lockout guard.
//!
//! Tracks consecutive failed logins per identifier and enforces a
//! temporary lockout once the threshold is reached. Must be consulted
//! before credential verification: a locked identifier is rejected even
//! with correct credentials.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::store::{LoginAttemptStore, SecurityEventStore};

/// Decision for a pending login attempt.
#[derive(Debug, Clone)]
pub struct LoginDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Surfaced so clients can display a retry time.
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            locked_until: None,
        }
    }
}

pub struct LoginLockoutGuard {
    attempts: Arc<dyn LoginAttemptStore>,
    events: Arc<dyn SecurityEventStore>,
    threshold: u32,
    lockout_duration: Duration,
}

impl LoginLockoutGuard {
    pub fn new(
        attempts: Arc<dyn LoginAttemptStore>,
        events: Arc<dyn SecurityEventStore>,
        threshold: u32,
        lockout_duration: Duration,
    ) -> Self {
        Self {
            attempts,
            events,
            threshold,
            lockout_duration,
        }
    }

    /// Check whether a login attempt for `identifier` may proceed.
    ///
    /// Storage failures allow the attempt through: lockout is a
    /// brute-force dampener layered over credential verification, not the
    /// credential check itself.
    pub fn check_login_allowed(&self, identifier: &str) -> LoginDecision {
        let record = match self.attempts.login_attempts(identifier) {
            Ok(record) => record,
            Err(e) => {
                error!(identifier, error = %e, "lockout lookup failed, allowing attempt");
                return LoginDecision::allowed();
            }
        };

        match record {
            Some(record) if record.is_locked(Utc::now()) => LoginDecision {
                allowed: false,
                reason: Some("too many failed login attempts".to_string()),
                locked_until: record.locked_until,
            },
            _ => LoginDecision::allowed(),
        }
    }

    /// Record a failed login. Emits a lockout event when the threshold is
    /// crossed.
    pub fn record_failure(&self, identifier: &str, ip: Option<&str>) {
        let record = match self.attempts.record_login_failure(
            identifier,
            self.threshold,
            self.lockout_duration,
        ) {
            Ok(record) => record,
            Err(e) => {
                error!(identifier, error = %e, "failed to record login failure");
                return;
            }
        };

        let just_locked = record.failure_count == self.threshold;
        let (event_type, severity) = if just_locked {
            warn!(
                identifier,
                failures = record.failure_count,
                "login lockout triggered"
            );
            (SecurityEventType::LoginLockout, Severity::Critical)
        } else {
            (SecurityEventType::LoginFailure, Severity::Warning)
        };

        let mut event = SecurityEvent::new(event_type, severity)
            .with_user(identifier)
            .with_detail("failure_count", record.failure_count.to_string());
        if let Some(ip) = ip {
            event = event.with_ip(ip);
        }
        if let Err(e) = self.events.append_event(event) {
            error!(identifier, error = %e, "failed to append login security event");
        }
    }

    /// Record a successful login: resets the failure counter from any
    /// state.
    pub fn record_success(&self, identifier: &str) {
        if let Err(e) = self.attempts.reset_login_attempts(identifier) {
            error!(identifier, error = %e, "failed to reset login attempts");
        }
    }
}
