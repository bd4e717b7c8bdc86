// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded-backoff dispatcher for idempotent actions.
//!
//! Retryability is a property of the error, decided at the point of origin
//! (`DispatchError`). Errors arriving from providers as opaque strings are
//! classified once at the boundary by `classify_provider_error` and carry
//! their retryability from there on.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Message fragments that mark an error as permanent: retrying cannot
/// change the outcome and risks duplicate side effects.
const PERMANENT_FRAGMENTS: &[&str] = &["invalid", "malformed", "already processed", "duplicate"];

/// Message fragments that mark an error as transient.
const TRANSIENT_FRAGMENTS: &[&str] = &["timeout", "connection", "temporary", "unavailable"];

/// Backoff configuration. Delay grows by `multiplier` per attempt, capped
/// at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Dispatch failure with retryability decided at origin.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("duplicate event: {0}")]
    Duplicate(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("dispatch cancelled")]
    Cancelled,

    /// Anything unclassified is treated as a transient server fault.
    #[error("{0}")]
    Other(String),
}

impl DispatchError {
    pub fn retryable(&self) -> bool {
        match self {
            DispatchError::Validation(_)
            | DispatchError::Duplicate(_)
            | DispatchError::Cancelled => false,
            DispatchError::Timeout(_)
            | DispatchError::Connection(_)
            | DispatchError::Unavailable(_)
            | DispatchError::Other(_) => true,
        }
    }
}

/// Classify an opaque provider error message into the typed taxonomy.
pub fn classify_provider_error(message: &str) -> DispatchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("duplicate") || lower.contains("already processed") {
        return DispatchError::Duplicate(message.to_string());
    }
    if PERMANENT_FRAGMENTS.iter().any(|f| lower.contains(f)) {
        return DispatchError::Validation(message.to_string());
    }
    if lower.contains("timeout") {
        return DispatchError::Timeout(message.to_string());
    }
    if lower.contains("connection") {
        return DispatchError::Connection(message.to_string());
    }
    if TRANSIENT_FRAGMENTS.iter().any(|f| lower.contains(f)) {
        return DispatchError::Unavailable(message.to_string());
    }
    DispatchError::Other(message.to_string())
}

/// Whether an opaque webhook error message warrants a retry.
pub fn is_retryable_message(message: &str) -> bool {
    classify_provider_error(message).retryable()
}

/// Execute `action` with bounded exponential backoff.
///
/// Retries only while `is_retryable` holds and attempts remain; returns
/// the first success or the last error. The cancellation token governs
/// both the attempts and the inter-attempt sleeps.
pub async fn execute<F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut action: F,
    is_retryable: impl Fn(&DispatchError) -> bool,
) -> Result<(), DispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DispatchError>>,
{
    let mut delay = config.base_delay;
    let mut last_error = DispatchError::Other("no attempts executed".to_string());

    for attempt in 1..=config.max_attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        match action().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let retry = is_retryable(&e) && attempt < config.max_attempts;
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    will_retry = retry,
                    "dispatch attempt failed"
                );
                if !retry {
                    return Err(e);
                }
                last_error = e;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay.min(config.max_delay)) => {},
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
        }
        delay = delay.mul_f64(config.multiplier).min(config.max_delay);
    }

    Err(last_error)
}
