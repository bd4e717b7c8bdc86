// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    aggregate::Overview,
    events::{SecurityEvent, SecurityEventType, Severity},
    guards::{device, ip_allowlist, mfa},
    models::{
        AddIpRequest, ConfirmWithdrawalRequest, Device, DeviceCheck, IpEntryStatus,
        IpWhitelistEntry, LoginRequest, LoginResponse, RegisterDeviceRequest,
    },
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod overview;
pub mod security;
pub mod webhooks;
pub mod withdrawals;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    // Authenticated surface behind the guard chain. Layers run outermost
    // first: device trust, then the IP allowlist, then the MFA gate.
    let guarded = Router::new()
        .route(
            "/security/ips",
            get(security::list_ips).post(security::add_ip),
        )
        .route("/security/ips/{entry_id}/verify", post(security::verify_ip))
        .route("/security/ips/{entry_id}", delete(security::remove_ip))
        .route(
            "/security/devices",
            get(security::list_devices).post(security::register_device),
        )
        .route(
            "/security/devices/{device_id}/revoke",
            post(security::revoke_device),
        )
        .route("/security/events", get(security::list_events))
        .route("/withdrawals/confirm", post(withdrawals::confirm_withdrawal))
        .route("/overview", get(overview::get_overview))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mfa::mfa_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ip_allowlist::ip_allowlist_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            device::device_trust_middleware,
        ));

    // Pre-authentication surface: login runs the lockout guard itself,
    // bootstrap is gated by the deployment token.
    let v1_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/admin/bootstrap", post(admin::bootstrap))
        .merge(guarded);

    // Webhook intake authenticates by signature, not by identity.
    let webhook_routes = Router::new()
        .route("/chain", post(webhooks::chain_webhook))
        .route("/due", post(webhooks::due_webhook))
        .route("/bridge", post(webhooks::bridge_webhook));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    Router::new()
        .nest("/v1", v1_routes)
        .nest("/webhooks", webhook_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        auth::login,
        admin::bootstrap,
        security::list_ips,
        security::add_ip,
        security::verify_ip,
        security::remove_ip,
        security::list_devices,
        security::register_device,
        security::revoke_device,
        security::list_events,
        withdrawals::confirm_withdrawal,
        overview::get_overview,
        webhooks::chain_webhook,
        webhooks::due_webhook,
        webhooks::bridge_webhook
    ),
    components(
        schemas(
            Device,
            DeviceCheck,
            IpWhitelistEntry,
            IpEntryStatus,
            SecurityEvent,
            SecurityEventType,
            Severity,
            Overview,
            AddIpRequest,
            RegisterDeviceRequest,
            LoginRequest,
            LoginResponse,
            ConfirmWithdrawalRequest,
            withdrawals::ConfirmWithdrawalResponse,
            admin::BootstrapRequest,
            admin::BootstrapResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Service health probes"),
        (name = "Auth", description = "Login with lockout protection"),
        (name = "Security", description = "Devices, IP allowlist, and audit trail"),
        (name = "Withdrawals", description = "Step-up withdrawal confirmation"),
        (name = "Overview", description = "Aggregated account overview"),
        (name = "Webhooks", description = "Signed provider webhook intake"),
        (name = "Admin", description = "Deployment bootstrap")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(AppState::new(Config::default()));
        // Ensure the router can be converted into a service without panicking.
        let _ = app.into_make_service();
    }
}
