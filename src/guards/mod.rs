// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Trust Boundary Guards
//!
//! Inbound requests pass login lockout (login only), device trust, the IP
//! allowlist, and the MFA gate before reaching business handlers. Each
//! guard either continues the request with attached context or
//! short-circuits with a structured `GuardError`.
//!
//! Failure policy per guard:
//!
//! - device trust and IP allowlist are advisory layers and fail open on
//!   store errors
//! - the MFA gate is part of authentication and fails closed
//! - revoked devices and active lockouts are hard rejections

pub mod device;
pub mod error;
pub mod identity;
pub mod ip_allowlist;
pub mod lockout;
pub mod mfa;

pub use device::{derive_fingerprint, DeviceTrustEngine, RISK_THRESHOLD};
pub use error::GuardError;
pub use identity::Identity;
pub use ip_allowlist::IpAllowlistGuard;
pub use lockout::{LoginDecision, LoginLockoutGuard};
pub use mfa::{MfaGate, MfaValidator, StaticMfaValidator};
