// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! Every component is constructed once at startup from `Config` and the
//! backing store, then handed to handlers through axum state. Nothing in
//! here is a process global.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{
    AggregationGateway, AllowlistSource, DevicesSource, OverviewSource, RecentEventsSource,
};
use crate::config::Config;
use crate::guards::mfa::StaticMfaValidator;
use crate::guards::{DeviceTrustEngine, IpAllowlistGuard, LoginLockoutGuard, MfaGate, MfaValidator};
use crate::store::MemoryStore;
use crate::webhooks::WebhookProcessor;
use crate::withdrawals::WithdrawalConfirmationFlow;

#[derive(Debug, thiserror::Error)]
#[error("credential verifier unavailable: {0}")]
pub struct CredentialError(pub String);

/// Primary-factor verification capability.
///
/// Returns the canonical user id on success, `None` on bad credentials.
/// Deployments back this with their user store; the default rejects
/// everything so an unconfigured instance cannot be logged into.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<String>, CredentialError>;
}

/// Rejects all credentials.
pub struct DenyAllVerifier;

#[async_trait]
impl CredentialVerifier for DenyAllVerifier {
    async fn verify(
        &self,
        _identifier: &str,
        _password: &str,
    ) -> Result<Option<String>, CredentialError> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub config: Arc<Config>,
    pub device_engine: Arc<DeviceTrustEngine>,
    pub ip_guard: Arc<IpAllowlistGuard>,
    pub lockout: Arc<LoginLockoutGuard>,
    pub mfa: Arc<MfaGate>,
    pub withdrawals: Arc<WithdrawalConfirmationFlow>,
    pub processor: WebhookProcessor,
    pub overview: Arc<AggregationGateway>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire up all components over an in-memory store.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mfa_validator: Arc<dyn MfaValidator> = Arc::new(StaticMfaValidator::Disabled);
        Self::with_parts(config, store, mfa_validator, Arc::new(DenyAllVerifier))
    }

    /// Wire up components with injected seams. Used by `main` to plug in
    /// real validators and by tests to substitute fakes.
    pub fn with_parts(
        config: Config,
        store: Arc<MemoryStore>,
        mfa_validator: Arc<dyn MfaValidator>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let device_engine = Arc::new(DeviceTrustEngine::new(store.clone(), store.clone()));
        let ip_guard = Arc::new(IpAllowlistGuard::new(store.clone(), store.clone()));
        let lockout = Arc::new(LoginLockoutGuard::new(
            store.clone(),
            store.clone(),
            config.lockout_threshold,
            config.lockout_duration,
        ));
        let mfa = Arc::new(MfaGate::new(
            mfa_validator,
            store.clone(),
            config.mfa_enforced,
        ));
        let withdrawals = Arc::new(WithdrawalConfirmationFlow::new(
            store.clone(),
            store.clone(),
        ));
        let processor = WebhookProcessor::new(store.clone());

        let sources: Vec<Arc<dyn OverviewSource>> = vec![
            Arc::new(DevicesSource {
                devices: store.clone(),
            }),
            Arc::new(AllowlistSource {
                allowlist: store.clone(),
            }),
            Arc::new(RecentEventsSource {
                events: store.clone(),
            }),
        ];
        let overview =
            Arc::new(AggregationGateway::new(sources).with_timeout(config.overview_timeout));

        Self {
            store,
            config: Arc::new(config),
            device_engine,
            ip_guard,
            lockout,
            mfa,
            withdrawals,
            processor,
            overview,
            credentials,
            shutdown: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_state_rejects_all_credentials() {
        let state = AppState::new(Config::default());
        let result = state
            .credentials
            .verify("user@example.com", "hunter2")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
