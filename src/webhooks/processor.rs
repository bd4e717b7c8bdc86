// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Idempotent webhook event processing.
//!
//! Each provider event carries a durable dedupe key (transaction hash,
//! event id, nonce). The key is claimed atomically before any side effect
//! runs, so concurrent duplicate deliveries resolve to exactly one
//! processing run; replays of a processed event short-circuit to
//! `AlreadyProcessed`.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::retry::{self, DispatchError, RetryConfig};
use crate::store::{ClaimOutcome, WebhookDeliveryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    AlreadyProcessed,
}

/// Drives a business action for a webhook event through dedupe and retry.
#[derive(Clone)]
pub struct WebhookProcessor {
    deliveries: Arc<dyn WebhookDeliveryStore>,
    retry: RetryConfig,
}

impl WebhookProcessor {
    pub fn new(deliveries: Arc<dyn WebhookDeliveryStore>) -> Self {
        Self {
            deliveries,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Process one delivery at most once.
    ///
    /// The dedupe store is the trust anchor here: if it is unavailable we
    /// fail the delivery rather than risk applying the event twice. The
    /// provider will redeliver.
    pub async fn process<F, Fut>(
        &self,
        provider: &str,
        event_key: &str,
        cancel: &CancellationToken,
        mut action: F,
    ) -> Result<ProcessOutcome, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DispatchError>>,
    {
        let claim = self
            .deliveries
            .claim_delivery(provider, event_key, Utc::now())
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

        if claim == ClaimOutcome::AlreadyProcessed {
            info!(provider, event_key, "duplicate delivery short-circuited");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        match retry::execute(&self.retry, cancel, &mut action, DispatchError::retryable).await {
            Ok(()) => {
                self.deliveries
                    .mark_delivery_processed(event_key)
                    .map_err(|e| DispatchError::Unavailable(e.to_string()))?;
                info!(provider, event_key, "delivery processed");
                Ok(ProcessOutcome::Processed)
            }
            Err(e) => {
                // Release the claim so a redelivery can try again.
                let _ = self.deliveries.mark_delivery_failed(event_key, &e.to_string());
                Err(e)
            }
        }
    }
}
