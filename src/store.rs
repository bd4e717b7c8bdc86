// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository seams for the trust boundary layer.
//!
//! Persistence engines are out of scope; guards talk to these traits and
//! the service ships with an in-memory implementation. The operations whose
//! correctness hinges on atomicity under concurrency (lockout increments,
//! confirmation-token consumption, delivery claims) are single trait methods
//! so an implementation can make them atomic (here: one write lock; in SQL: a
//! conditional update or unique constraint).

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::events::SecurityEvent;
use crate::models::{
    DeliveryStatus, Device, IpEntryStatus, IpWhitelistEntry, LoginAttemptRecord,
    WebhookDelivery, WithdrawalConfirmation,
};

/// Sliding window for the velocity risk signal.
const SIGHTING_WINDOW: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an owner-scoped mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedMutation {
    Applied,
    NotFound,
    NotOwner,
}

/// Outcome of an atomic confirmation-token redemption.
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    Consumed(WithdrawalConfirmation),
    NotFound,
    NotOwner,
    Expired,
    AlreadyConsumed,
}

/// Outcome of an atomic delivery-key claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Key was free (or previously failed); the caller now owns processing.
    Claimed,
    /// Key was already processed or is being processed concurrently.
    AlreadyProcessed,
}

pub trait DeviceStore: Send + Sync {
    fn find_device(&self, user_id: &str, fingerprint: &str) -> StoreResult<Option<Device>>;
    fn insert_device(&self, device: Device) -> StoreResult<()>;
    /// Update sighting fields on an existing device.
    fn touch_device(
        &self,
        device_id: &str,
        ip: &str,
        risk_score: f64,
        risk_factors: &[String],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    fn list_devices(&self, user_id: &str) -> StoreResult<Vec<Device>>;
    fn revoke_device(&self, user_id: &str, device_id: &str) -> StoreResult<OwnedMutation>;
    /// Record a request sighting for the user and return the number of
    /// sightings inside the trailing window (velocity signal).
    fn record_sighting(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<u32>;
}

pub trait IpAllowlistStore: Send + Sync {
    fn insert_ip(&self, entry: IpWhitelistEntry) -> StoreResult<()>;
    fn verify_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation>;
    fn remove_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation>;
    fn list_ips(&self, user_id: &str) -> StoreResult<Vec<IpWhitelistEntry>>;
    /// Whether the user has any allowlist entries at all (enabled check).
    fn has_ip_entries(&self, user_id: &str) -> StoreResult<bool>;
    /// Whether the user has a verified entry matching `ip`.
    fn has_verified_ip(&self, user_id: &str, ip: &str) -> StoreResult<bool>;
}

pub trait LoginAttemptStore: Send + Sync {
    fn login_attempts(&self, identifier: &str) -> StoreResult<Option<LoginAttemptRecord>>;
    /// Atomically increment the failure counter; once it reaches
    /// `lock_after`, set `locked_until = now + lock_for`.
    fn record_login_failure(
        &self,
        identifier: &str,
        lock_after: u32,
        lock_for: Duration,
    ) -> StoreResult<LoginAttemptRecord>;
    fn reset_login_attempts(&self, identifier: &str) -> StoreResult<()>;
}

pub trait ConfirmationStore: Send + Sync {
    fn insert_confirmation(&self, confirmation: WithdrawalConfirmation) -> StoreResult<()>;
    /// Atomically redeem a token for `user_id`. Exactly one concurrent
    /// caller can observe `Consumed`; everyone else sees a failure
    /// variant. Ownership is checked before the token is burned.
    fn consume_confirmation(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome>;
}

pub trait SecurityEventStore: Send + Sync {
    fn append_event(&self, event: SecurityEvent) -> StoreResult<()>;
    /// Most recent events first, capped at `limit`.
    fn events_for_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<SecurityEvent>>;
}

pub trait WebhookDeliveryStore: Send + Sync {
    /// Atomically claim `event_key` for processing. A key in `Processing`
    /// or `Processed` state is refused; a `Failed` key may be reclaimed by
    /// a provider redelivery.
    fn claim_delivery(
        &self,
        provider: &str,
        event_key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome>;
    fn mark_delivery_processed(&self, event_key: &str) -> StoreResult<()>;
    fn mark_delivery_failed(&self, event_key: &str, error: &str) -> StoreResult<()>;
    fn delivery(&self, event_key: &str) -> StoreResult<Option<WebhookDelivery>>;
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    sightings: HashMap<String, VecDeque<DateTime<Utc>>>,
    ip_entries: HashMap<String, IpWhitelistEntry>,
    login_attempts: HashMap<String, LoginAttemptRecord>,
    confirmations: HashMap<String, WithdrawalConfirmation>,
    events: Vec<SecurityEvent>,
    deliveries: HashMap<String, WebhookDelivery>,
    bootstrapped: bool,
}

/// In-memory store backing every repository trait. Suitable for tests and
/// single-process deployments; swap per-trait for a durable engine.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    /// One-time bootstrap latch for privileged first-admin creation.
    /// Returns true exactly once.
    pub fn try_mark_bootstrapped(&self) -> StoreResult<bool> {
        let mut inner = self.write()?;
        if inner.bootstrapped {
            Ok(false)
        } else {
            inner.bootstrapped = true;
            Ok(true)
        }
    }
}

impl DeviceStore for MemoryStore {
    fn find_device(&self, user_id: &str, fingerprint: &str) -> StoreResult<Option<Device>> {
        let inner = self.read()?;
        Ok(inner
            .devices
            .values()
            .find(|d| d.user_id == user_id && d.fingerprint == fingerprint)
            .cloned())
    }

    fn insert_device(&self, device: Device) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner.devices.insert(device.id.clone(), device);
        Ok(())
    }

    fn touch_device(
        &self,
        device_id: &str,
        ip: &str,
        risk_score: f64,
        risk_factors: &[String],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.write()?;
        if let Some(device) = inner.devices.get_mut(device_id) {
            device.ip_address = ip.to_string();
            device.risk_score = risk_score;
            device.risk_factors = risk_factors.to_vec();
            device.last_seen_at = seen_at;
        }
        Ok(())
    }

    fn list_devices(&self, user_id: &str) -> StoreResult<Vec<Device>> {
        let inner = self.read()?;
        let mut devices: Vec<Device> = inner
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }

    fn revoke_device(&self, user_id: &str, device_id: &str) -> StoreResult<OwnedMutation> {
        let mut inner = self.write()?;
        match inner.devices.get_mut(device_id) {
            None => Ok(OwnedMutation::NotFound),
            Some(device) if device.user_id != user_id => Ok(OwnedMutation::NotOwner),
            Some(device) => {
                device.is_trusted = false;
                device.revoked = true;
                Ok(OwnedMutation::Applied)
            }
        }
    }

    fn record_sighting(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<u32> {
        let mut inner = self.write()?;
        let window = inner.sightings.entry(user_id.to_string()).or_default();
        window.push_back(now);
        while window
            .front()
            .is_some_and(|first| now - *first > SIGHTING_WINDOW)
        {
            window.pop_front();
        }
        Ok(window.len() as u32)
    }
}

impl IpAllowlistStore for MemoryStore {
    fn insert_ip(&self, entry: IpWhitelistEntry) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner.ip_entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn verify_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation> {
        let mut inner = self.write()?;
        match inner.ip_entries.get_mut(entry_id) {
            None => Ok(OwnedMutation::NotFound),
            Some(entry) if entry.user_id != user_id => Ok(OwnedMutation::NotOwner),
            Some(entry) => {
                entry.status = IpEntryStatus::Verified;
                Ok(OwnedMutation::Applied)
            }
        }
    }

    fn remove_ip(&self, user_id: &str, entry_id: &str) -> StoreResult<OwnedMutation> {
        let mut inner = self.write()?;
        match inner.ip_entries.get(entry_id) {
            None => Ok(OwnedMutation::NotFound),
            Some(entry) if entry.user_id != user_id => Ok(OwnedMutation::NotOwner),
            Some(_) => {
                inner.ip_entries.remove(entry_id);
                Ok(OwnedMutation::Applied)
            }
        }
    }

    fn list_ips(&self, user_id: &str) -> StoreResult<Vec<IpWhitelistEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<IpWhitelistEntry> = inner
            .ip_entries
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    fn has_ip_entries(&self, user_id: &str) -> StoreResult<bool> {
        let inner = self.read()?;
        Ok(inner.ip_entries.values().any(|e| e.user_id == user_id))
    }

    fn has_verified_ip(&self, user_id: &str, ip: &str) -> StoreResult<bool> {
        let inner = self.read()?;
        Ok(inner.ip_entries.values().any(|e| {
            e.user_id == user_id && e.ip_address == ip && e.status == IpEntryStatus::Verified
        }))
    }
}

impl LoginAttemptStore for MemoryStore {
    fn login_attempts(&self, identifier: &str) -> StoreResult<Option<LoginAttemptRecord>> {
        let inner = self.read()?;
        Ok(inner.login_attempts.get(identifier).cloned())
    }

    fn record_login_failure(
        &self,
        identifier: &str,
        lock_after: u32,
        lock_for: Duration,
    ) -> StoreResult<LoginAttemptRecord> {
        let mut inner = self.write()?;
        let record = inner
            .login_attempts
            .entry(identifier.to_string())
            .or_insert_with(|| LoginAttemptRecord {
                identifier: identifier.to_string(),
                failure_count: 0,
                locked_until: None,
            });
        record.failure_count += 1;
        if record.failure_count >= lock_after {
            let lock_for = chrono::Duration::from_std(lock_for)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));
            record.locked_until = Some(Utc::now() + lock_for);
        }
        Ok(record.clone())
    }

    fn reset_login_attempts(&self, identifier: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner.login_attempts.remove(identifier);
        Ok(())
    }
}

impl ConfirmationStore for MemoryStore {
    fn insert_confirmation(&self, confirmation: WithdrawalConfirmation) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner
            .confirmations
            .insert(confirmation.token.clone(), confirmation);
        Ok(())
    }

    fn consume_confirmation(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        let mut inner = self.write()?;
        let Some(confirmation) = inner.confirmations.get_mut(token) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if confirmation.user_id != user_id {
            return Ok(ConsumeOutcome::NotOwner);
        }
        if confirmation.consumed {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        if now >= confirmation.expires_at {
            return Ok(ConsumeOutcome::Expired);
        }
        confirmation.consumed = true;
        Ok(ConsumeOutcome::Consumed(confirmation.clone()))
    }
}

impl SecurityEventStore for MemoryStore {
    fn append_event(&self, event: SecurityEvent) -> StoreResult<()> {
        let mut inner = self.write()?;
        inner.events.push(event);
        Ok(())
    }

    fn events_for_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<SecurityEvent>> {
        let inner = self.read()?;
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl WebhookDeliveryStore for MemoryStore {
    fn claim_delivery(
        &self,
        provider: &str,
        event_key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ClaimOutcome> {
        let mut inner = self.write()?;
        match inner.deliveries.get_mut(event_key) {
            Some(delivery) if delivery.status != DeliveryStatus::Failed => {
                Ok(ClaimOutcome::AlreadyProcessed)
            }
            Some(delivery) => {
                delivery.status = DeliveryStatus::Processing;
                delivery.last_error = None;
                Ok(ClaimOutcome::Claimed)
            }
            None => {
                inner.deliveries.insert(
                    event_key.to_string(),
                    WebhookDelivery {
                        event_key: event_key.to_string(),
                        provider: provider.to_string(),
                        status: DeliveryStatus::Processing,
                        received_at: now,
                        last_error: None,
                    },
                );
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    fn mark_delivery_processed(&self, event_key: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        if let Some(delivery) = inner.deliveries.get_mut(event_key) {
            delivery.status = DeliveryStatus::Processed;
        }
        Ok(())
    }

    fn mark_delivery_failed(&self, event_key: &str, error: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        if let Some(delivery) = inner.deliveries.get_mut(event_key) {
            delivery.status = DeliveryStatus::Failed;
            delivery.last_error = Some(error.to_string());
        }
        Ok(())
    }

    fn delivery(&self, event_key: &str) -> StoreResult<Option<WebhookDelivery>> {
        let inner = self.read()?;
        Ok(inner.deliveries.get(event_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SecurityEventType, Severity};

    fn confirmation(token: &str, user: &str, expires_in_secs: i64) -> WithdrawalConfirmation {
        WithdrawalConfirmation {
            token: token.to_string(),
            withdrawal_id: "wd_1".into(),
            user_id: user.to_string(),
            amount: "100.00".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            consumed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confirmation_consumed_exactly_once() {
        let store = MemoryStore::new();
        store
            .insert_confirmation(confirmation("tok_1", "user_1", 300))
            .unwrap();

        let first = store
            .consume_confirmation("tok_1", "user_1", Utc::now())
            .unwrap();
        assert!(matches!(first, ConsumeOutcome::Consumed(_)));

        let second = store
            .consume_confirmation("tok_1", "user_1", Utc::now())
            .unwrap();
        assert!(matches!(second, ConsumeOutcome::AlreadyConsumed));
    }

    #[test]
    fn confirmation_ownership_checked_before_burning() {
        let store = MemoryStore::new();
        store
            .insert_confirmation(confirmation("tok_1", "user_1", 300))
            .unwrap();

        let outcome = store
            .consume_confirmation("tok_1", "intruder", Utc::now())
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::NotOwner));

        // The owner can still redeem: the failed attempt did not consume it.
        let outcome = store
            .consume_confirmation("tok_1", "user_1", Utc::now())
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Consumed(_)));
    }

    #[test]
    fn expired_confirmation_never_succeeds() {
        let store = MemoryStore::new();
        store
            .insert_confirmation(confirmation("tok_1", "user_1", -1))
            .unwrap();

        let outcome = store
            .consume_confirmation("tok_1", "user_1", Utc::now())
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Expired));
    }

    #[test]
    fn login_failures_lock_at_threshold() {
        let store = MemoryStore::new();
        for i in 1..5 {
            let record = store
                .record_login_failure("user@example.com", 5, Duration::from_secs(900))
                .unwrap();
            assert_eq!(record.failure_count, i);
            assert!(record.locked_until.is_none());
        }

        let record = store
            .record_login_failure("user@example.com", 5, Duration::from_secs(900))
            .unwrap();
        assert_eq!(record.failure_count, 5);
        assert!(record.is_locked(Utc::now()));

        store.reset_login_attempts("user@example.com").unwrap();
        assert!(store.login_attempts("user@example.com").unwrap().is_none());
    }

    #[test]
    fn delivery_claim_is_at_most_once() {
        let store = MemoryStore::new();
        let now = Utc::now();

        assert_eq!(
            store.claim_delivery("chain", "chain:0xabc", now).unwrap(),
            ClaimOutcome::Claimed
        );
        // Concurrent duplicate while still processing.
        assert_eq!(
            store.claim_delivery("chain", "chain:0xabc", now).unwrap(),
            ClaimOutcome::AlreadyProcessed
        );

        store.mark_delivery_processed("chain:0xabc").unwrap();
        assert_eq!(
            store.claim_delivery("chain", "chain:0xabc", now).unwrap(),
            ClaimOutcome::AlreadyProcessed
        );
    }

    #[test]
    fn failed_delivery_can_be_reclaimed() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.claim_delivery("due", "due:evt_1", now).unwrap();
        store.mark_delivery_failed("due:evt_1", "timeout").unwrap();

        let delivery = store.delivery("due:evt_1").unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.last_error.as_deref(), Some("timeout"));

        assert_eq!(
            store.claim_delivery("due", "due:evt_1", now).unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[test]
    fn sighting_window_prunes_old_entries() {
        let store = MemoryStore::new();
        let start = Utc::now();

        for i in 0..3 {
            let count = store
                .record_sighting("user_1", start + chrono::Duration::seconds(i))
                .unwrap();
            assert_eq!(count, (i + 1) as u32);
        }

        // Two minutes later only the new sighting is inside the window.
        let count = store
            .record_sighting("user_1", start + chrono::Duration::seconds(120))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn events_query_is_newest_first_and_capped() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_event(
                    SecurityEvent::new(SecurityEventType::LoginFailure, Severity::Warning)
                        .with_user("user_1")
                        .with_detail("attempt", i.to_string()),
                )
                .unwrap();
        }
        store
            .append_event(
                SecurityEvent::new(SecurityEventType::IpAdded, Severity::Info).with_user("user_2"),
            )
            .unwrap();

        let events = store.events_for_user("user_1", 3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].metadata.get("attempt").unwrap(), "4");
    }

    #[test]
    fn bootstrap_latch_fires_once() {
        let store = MemoryStore::new();
        assert!(store.try_mark_bootstrapped().unwrap());
        assert!(!store.try_mark_bootstrapped().unwrap());
    }
}
