// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and passed
//! by reference (inside `AppState`) to every component. There is no global
//! mutable configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENVIRONMENT` | `production` or `development` | `development` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `{PROVIDER}_WEBHOOK_SECRET` | HMAC secret per webhook provider (`CHAIN`, `DUE`, `BRIDGE`) | unset (fail closed) |
//! | `{PROVIDER}_WEBHOOK_SKIP_VERIFY` | Skip signature verification (dev only) | `false` |
//! | `LOCKOUT_THRESHOLD` | Consecutive failures before lockout | `5` |
//! | `LOCKOUT_DURATION_SECS` | Lockout duration in seconds | `900` |
//! | `MFA_ENFORCED` | Whether the MFA gate is active | `true` |
//! | `OVERVIEW_TIMEOUT_MS` | Overall deadline for the overview fan-out | `3000` |
//! | `BOOTSTRAP_TOKEN` | Token for privileged first-admin creation | unset (endpoint disabled) |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

/// Webhook provider identifiers with configurable secrets.
pub const WEBHOOK_PROVIDERS: &[&str] = &["chain", "due", "bridge"];

const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 900;
const DEFAULT_OVERVIEW_TIMEOUT_MS: u64 = 3_000;

/// Deployment environment. Controls whether dev-only escape hatches
/// (skip-verification flags) are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn from_env() -> Self {
        match env_or_default("ENVIRONMENT", "development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Per-provider webhook verification settings.
#[derive(Debug, Clone, Default)]
pub struct WebhookProviderConfig {
    /// Shared HMAC secret. When unset, all deliveries from this provider
    /// are rejected unless `skip_verification` is set (dev only).
    pub secret: Option<String>,
    /// Skip signature verification entirely. Never honored in production.
    pub skip_verification: bool,
}

/// Process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub webhook_providers: HashMap<String, WebhookProviderConfig>,
    pub lockout_threshold: u32,
    pub lockout_duration: Duration,
    pub mfa_enforced: bool,
    pub overview_timeout: Duration,
    pub bootstrap_token: Option<String>,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Skip-verification flags set in production are discarded with a
    /// warning: a misconfigured flag must never weaken a production
    /// deployment.
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let mut webhook_providers = HashMap::new();
        for provider in WEBHOOK_PROVIDERS {
            let upper = provider.to_ascii_uppercase();
            let secret = env_optional(&format!("{upper}_WEBHOOK_SECRET"));
            let mut skip_verification =
                env_or_default(&format!("{upper}_WEBHOOK_SKIP_VERIFY"), "false") == "true";

            if skip_verification && environment == Environment::Production {
                warn!(
                    provider = provider,
                    "skip-verification flag ignored in production"
                );
                skip_verification = false;
            }

            webhook_providers.insert(
                provider.to_string(),
                WebhookProviderConfig {
                    secret,
                    skip_verification,
                },
            );
        }

        let lockout_threshold = env_or_default("LOCKOUT_THRESHOLD", "")
            .parse()
            .unwrap_or(DEFAULT_LOCKOUT_THRESHOLD);
        let lockout_duration_secs: u64 = env_or_default("LOCKOUT_DURATION_SECS", "")
            .parse()
            .unwrap_or(DEFAULT_LOCKOUT_DURATION_SECS);
        let overview_timeout_ms: u64 = env_or_default("OVERVIEW_TIMEOUT_MS", "")
            .parse()
            .unwrap_or(DEFAULT_OVERVIEW_TIMEOUT_MS);

        Self {
            environment,
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8080").parse().unwrap_or(8080),
            webhook_providers,
            lockout_threshold,
            lockout_duration: Duration::from_secs(lockout_duration_secs),
            mfa_enforced: env_or_default("MFA_ENFORCED", "true") != "false",
            overview_timeout: Duration::from_millis(overview_timeout_ms),
            bootstrap_token: env_optional("BOOTSTRAP_TOKEN"),
        }
    }

    /// Verification settings for a webhook provider. Unknown providers get
    /// the default (no secret, no skip), i.e. fail closed.
    pub fn webhook_provider(&self, provider: &str) -> WebhookProviderConfig {
        self.webhook_providers
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for Config {
    /// Development defaults used by tests: no secrets, lenient MFA toggle on.
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            host: "127.0.0.1".to_string(),
            port: 8080,
            webhook_providers: HashMap::new(),
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_DURATION_SECS),
            mfa_enforced: true,
            overview_timeout: Duration::from_millis(DEFAULT_OVERVIEW_TIMEOUT_MS),
            bootstrap_token: None,
        }
    }
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_fails_closed() {
        let config = Config::default();
        let provider = config.webhook_provider("nonexistent");
        assert!(provider.secret.is_none());
        assert!(!provider.skip_verification);
    }

    #[test]
    fn default_config_has_lockout_policy() {
        let config = Config::default();
        assert_eq!(config.lockout_threshold, 5);
        assert_eq!(config.lockout_duration, Duration::from_secs(900));
        assert!(config.mfa_enforced);
    }
}
