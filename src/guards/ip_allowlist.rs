// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-user IP allowlist with a pending-verification state machine.
//!
//! Entries are created `pending` and grant nothing until the owning user
//! verifies them. A user with no entries has allowlisting disabled (open
//! policy). Enforcement fails open on store errors: this is a
//! defense-in-depth layer over authentication, not the sole gate.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use super::identity::{client_ip, identity_from_request};
use super::GuardError;
use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::models::{IpEntryStatus, IpWhitelistEntry};
use crate::state::AppState;
use crate::store::{IpAllowlistStore, OwnedMutation, SecurityEventStore, StoreResult};

const DEFAULT_LABEL: &str = "Unlabeled";

pub struct IpAllowlistGuard {
    store: Arc<dyn IpAllowlistStore>,
    events: Arc<dyn SecurityEventStore>,
}

impl IpAllowlistGuard {
    pub fn new(store: Arc<dyn IpAllowlistStore>, events: Arc<dyn SecurityEventStore>) -> Self {
        Self { store, events }
    }

    /// Add an allowlist entry. Always created pending; access is granted
    /// only after explicit verification by the owner.
    pub fn add_ip(
        &self,
        user_id: &str,
        ip: &str,
        label: Option<&str>,
    ) -> StoreResult<IpWhitelistEntry> {
        let entry = IpWhitelistEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            ip_address: ip.to_string(),
            label: label.unwrap_or(DEFAULT_LABEL).to_string(),
            status: IpEntryStatus::Pending,
            created_at: Utc::now(),
        };
        self.store.insert_ip(entry.clone())?;
        self.append_event(
            SecurityEvent::new(SecurityEventType::IpAdded, Severity::Info)
                .with_user(user_id)
                .with_detail("entry_id", entry.id.clone())
                .with_detail("ip_address", ip),
        );
        Ok(entry)
    }

    /// Transition a pending entry to verified. Only the owning user may
    /// verify their own entry.
    pub fn verify_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation> {
        let outcome = self.store.verify_ip(user_id, entry_id)?;
        if outcome == OwnedMutation::Applied {
            self.append_event(
                SecurityEvent::new(SecurityEventType::IpVerified, Severity::Info)
                    .with_user(user_id)
                    .with_detail("entry_id", entry_id),
            );
        }
        Ok(outcome)
    }

    pub fn remove_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation> {
        let outcome = self.store.remove_ip(user_id, entry_id)?;
        if outcome == OwnedMutation::Applied {
            self.append_event(
                SecurityEvent::new(SecurityEventType::IpRemoved, Severity::Info)
                    .with_user(user_id)
                    .with_detail("entry_id", entry_id),
            );
        }
        Ok(outcome)
    }

    pub fn list_ips(&self, user_id: &str) -> StoreResult<Vec<IpWhitelistEntry>> {
        self.store.list_ips(user_id)
    }

    /// Enforcement decision for a caller IP.
    ///
    /// True when the user has a verified entry matching `ip`, or has no
    /// entries at all (never opted in). Store failures fail open.
    pub fn is_ip_whitelisted(&self, user_id: &str, ip: &str) -> bool {
        let enabled = match self.store.has_ip_entries(user_id) {
            Ok(enabled) => enabled,
            Err(e) => {
                error!(user_id, error = %e, "allowlist lookup failed, failing open");
                return true;
            }
        };
        if !enabled {
            return true;
        }
        match self.store.has_verified_ip(user_id, ip) {
            Ok(matched) => matched,
            Err(e) => {
                error!(user_id, error = %e, "allowlist match failed, failing open");
                true
            }
        }
    }

    fn append_event(&self, event: SecurityEvent) {
        if let Err(e) = self.events.append_event(event) {
            error!(error = %e, "failed to append allowlist security event");
        }
    }
}

/// Enforcement middleware: rejects callers whose IP does not match a
/// verified entry once the user has opted in.
pub async fn ip_allowlist_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity) = identity_from_request(&request) else {
        return GuardError::Unauthenticated.into_response();
    };
    let ip = client_ip(request.extensions(), request.headers())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.ip_guard.is_ip_whitelisted(&identity.user_id, &ip) {
        warn!(user_id = %identity.user_id, ip = %ip, "request IP not whitelisted");
        let _ = state.store.append_event(
            SecurityEvent::new(SecurityEventType::IpRejected, Severity::Warning)
                .with_user(&identity.user_id)
                .with_ip(&ip),
        );
        return GuardError::IpNotWhitelisted.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn guard(store: &Arc<MemoryStore>) -> IpAllowlistGuard {
        IpAllowlistGuard::new(store.clone(), store.clone())
    }

    #[test]
    fn entries_start_pending_and_grant_nothing() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);

        let entry = guard.add_ip("user_1", "203.0.113.1", Some("Home")).unwrap();
        assert_eq!(entry.status, IpEntryStatus::Pending);

        // Opted in (has entries) but nothing verified: everything rejected.
        assert!(!guard.is_ip_whitelisted("user_1", "203.0.113.1"));
    }

    #[test]
    fn verified_entry_grants_matching_ip_only() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);

        let entry = guard.add_ip("user_1", "203.0.113.1", None).unwrap();
        assert_eq!(
            guard.verify_ip("user_1", &entry.id).unwrap(),
            OwnedMutation::Applied
        );

        assert!(guard.is_ip_whitelisted("user_1", "203.0.113.1"));
        assert!(!guard.is_ip_whitelisted("user_1", "198.51.100.9"));
    }

    #[test]
    fn no_entries_means_open_policy() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        assert!(guard.is_ip_whitelisted("user_1", "203.0.113.1"));
    }

    #[test]
    fn only_owner_may_verify() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);

        let entry = guard.add_ip("user_1", "203.0.113.1", None).unwrap();
        assert_eq!(
            guard.verify_ip("intruder", &entry.id).unwrap(),
            OwnedMutation::NotOwner
        );
        assert_eq!(
            guard.verify_ip("user_1", "missing").unwrap(),
            OwnedMutation::NotFound
        );
        // The failed attempts changed nothing.
        assert!(!guard.is_ip_whitelisted("user_1", "203.0.113.1"));
    }

    #[test]
    fn removal_disables_allowlisting_when_last_entry_goes() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);

        let entry = guard.add_ip("user_1", "203.0.113.1", None).unwrap();
        guard.verify_ip("user_1", &entry.id).unwrap();
        assert!(!guard.is_ip_whitelisted("user_1", "198.51.100.9"));

        assert_eq!(
            guard.remove_ip("user_1", &entry.id).unwrap(),
            OwnedMutation::Applied
        );
        // Back to the open policy.
        assert!(guard.is_ip_whitelisted("user_1", "198.51.100.9"));
    }

    #[test]
    fn listing_is_scoped_to_user() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);

        guard.add_ip("user_1", "203.0.113.1", None).unwrap();
        guard.add_ip("user_2", "198.51.100.9", None).unwrap();

        let entries = guard.list_ips("user_1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip_address, "203.0.113.1");
    }
}
