// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Step-up confirmation flow for high-risk withdrawals.
//!
//! The withdrawal business flow issues a single-use token when a
//! withdrawal needs explicit confirmation; redemption is exactly-once and
//! audited. A consumed or expired token can never succeed again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::events::{SecurityEvent, SecurityEventType, Severity};
use crate::models::WithdrawalConfirmation;
use crate::store::{ConfirmationStore, ConsumeOutcome, SecurityEventStore, StoreError};

/// Default confirmation validity.
const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    #[error("confirmation token not found")]
    NotFound,

    #[error("confirmation token has expired")]
    Expired,

    #[error("confirmation token was already used")]
    AlreadyConsumed,

    #[error("confirmation token belongs to another user")]
    NotOwner,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct WithdrawalConfirmationFlow {
    confirmations: Arc<dyn ConfirmationStore>,
    events: Arc<dyn SecurityEventStore>,
    ttl: Duration,
}

impl WithdrawalConfirmationFlow {
    pub fn new(
        confirmations: Arc<dyn ConfirmationStore>,
        events: Arc<dyn SecurityEventStore>,
    ) -> Self {
        Self {
            confirmations,
            events,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a single-use confirmation token for a withdrawal.
    pub fn issue_confirmation(
        &self,
        user_id: &str,
        withdrawal_id: &str,
        amount: &str,
    ) -> Result<WithdrawalConfirmation, ConfirmationError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let confirmation = WithdrawalConfirmation {
            token: Uuid::new_v4().to_string(),
            withdrawal_id: withdrawal_id.to_string(),
            user_id: user_id.to_string(),
            amount: amount.to_string(),
            expires_at: Utc::now() + ttl,
            consumed: false,
            created_at: Utc::now(),
        };
        self.confirmations.insert_confirmation(confirmation.clone())?;
        Ok(confirmation)
    }

    /// Redeem a confirmation token. The first successful call atomically
    /// consumes the token; concurrent redemptions cannot both succeed.
    pub fn verify_confirmation(
        &self,
        token: &str,
        user_id: &str,
        ip: Option<&str>,
    ) -> Result<WithdrawalConfirmation, ConfirmationError> {
        match self
            .confirmations
            .consume_confirmation(token, user_id, Utc::now())?
        {
            ConsumeOutcome::Consumed(confirmation) => {
                info!(
                    user_id,
                    withdrawal_id = %confirmation.withdrawal_id,
                    "withdrawal confirmed"
                );
                let mut event =
                    SecurityEvent::new(SecurityEventType::WithdrawalConfirmed, Severity::Info)
                        .with_user(user_id)
                        .with_detail("withdrawal_id", confirmation.withdrawal_id.clone())
                        .with_detail("amount", confirmation.amount.clone());
                if let Some(ip) = ip {
                    event = event.with_ip(ip);
                }
                if let Err(e) = self.events.append_event(event) {
                    error!(user_id, error = %e, "failed to append confirmation event");
                }
                Ok(confirmation)
            }
            ConsumeOutcome::NotFound => Err(ConfirmationError::NotFound),
            ConsumeOutcome::NotOwner => Err(ConfirmationError::NotOwner),
            ConsumeOutcome::Expired => Err(ConfirmationError::Expired),
            ConsumeOutcome::AlreadyConsumed => Err(ConfirmationError::AlreadyConsumed),
        }
    }
}
