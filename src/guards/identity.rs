// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated identity and client IP resolution.
//!
//! Authentication itself is an external collaborator: an upstream layer
//! authenticates the caller and attaches the identity. Guards and handlers
//! consume it through the `Identity` extractor and never see credentials.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Extensions, HeaderMap},
};

use super::GuardError;

/// Header carrying the authenticated user id when the service sits behind
/// an authenticating gateway. Only trusted because the transport from the
/// gateway is.
pub const AUTHENTICATED_USER_HEADER: &str = "x-authenticated-user";

/// Header a client may use to report its IP when the service is fronted
/// by a proxy.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Middleware (or a test) may have attached the identity already.
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(identity);
        }

        let user_id = parts
            .headers
            .get(AUTHENTICATED_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(GuardError::Unauthenticated)?;

        Ok(Identity {
            user_id: user_id.to_string(),
        })
    }
}

/// Resolve the identity from a request without consuming it. Used by
/// middleware that runs before handler extractors.
pub fn identity_from_request<B>(request: &axum::http::Request<B>) -> Option<Identity> {
    if let Some(identity) = request.extensions().get::<Identity>() {
        return Some(identity.clone());
    }
    request
        .headers()
        .get(AUTHENTICATED_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|user_id| Identity {
            user_id: user_id.to_string(),
        })
}

/// Resolve the caller's IP: transport-level peer address first, then the
/// forwarded-for header a fronting proxy sets.
pub fn client_ip(extensions: &Extensions, headers: &HeaderMap) -> Option<String> {
    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip().to_string());
    }
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
