// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Trustgate - Fintech Trust Boundary Service
//!
//! This crate decides whether a request, device, or inbound financial
//! webhook may be trusted before any business logic executes.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `guards` - request guards: device trust, IP allowlist, lockout, MFA
//! - `webhooks` - signed webhook intake with retry and dedupe
//! - `aggregate` - concurrent fan-out for the account overview
//! - `store` - storage seams and the in-memory store

pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod guards;
pub mod models;
pub mod state;
pub mod store;
pub mod webhooks;
pub mod withdrawals;
