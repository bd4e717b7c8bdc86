// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Webhook Intake
//!
//! Trust boundary for inbound provider webhooks:
//!
//! 1. `signature` - constant-time HMAC-SHA256 verification over the raw
//!    body (fail closed when no secret is configured)
//! 2. `retry` - bounded exponential backoff with a typed retryability
//!    taxonomy
//! 3. `processor` - at-most-once processing keyed by provider event id

pub mod processor;
pub mod retry;
pub mod signature;

pub use processor::{ProcessOutcome, WebhookProcessor};
pub use retry::{classify_provider_error, DispatchError, RetryConfig};
pub use signature::{constant_time_eq, verify_delivery, verify_signature, SignatureError};
