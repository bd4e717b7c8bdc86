// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fan-out aggregation for the account overview.
//!
//! The overview endpoint gathers several independent signals for one
//! response. Each fetch runs concurrently and is guarded individually: a
//! failed fetch becomes a named warning plus a defaulted field, never a
//! failed request. The whole fan-out is bounded by a single deadline;
//! whatever has not completed by then is reported unavailable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::warn;
use utoipa::ToSchema;

use crate::store::{DeviceStore, IpAllowlistStore, SecurityEventStore};

/// Default fan-out deadline.
pub const DEFAULT_OVERVIEW_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SourceError(pub String);

/// One independently fetched overview signal.
#[async_trait]
pub trait OverviewSource: Send + Sync {
    /// Field name in the overview response, also used in warnings.
    fn name(&self) -> &'static str;

    /// Value to report when the fetch fails or times out.
    fn default_value(&self) -> Value {
        Value::Null
    }

    async fn fetch(&self, user_id: &str) -> Result<Value, SourceError>;
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Overview {
    /// Field name to fetched (or defaulted) value.
    pub fields: BTreeMap<String, Value>,
    /// One entry per fetch that failed or missed the deadline.
    pub warnings: Vec<String>,
}

pub struct AggregationGateway {
    sources: Vec<Arc<dyn OverviewSource>>,
    timeout: Duration,
}

impl AggregationGateway {
    pub fn new(sources: Vec<Arc<dyn OverviewSource>>) -> Self {
        Self {
            sources,
            timeout: DEFAULT_OVERVIEW_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fan out all sources for a user and merge as each completes.
    ///
    /// Merging happens on the collecting task, so no lock is held around
    /// the result structure. The deadline covers the whole fan-out; late
    /// sources are defaulted with a timeout warning.
    pub async fn fetch_overview(&self, user_id: &str) -> Overview {
        let mut fields: BTreeMap<String, Value> = self
            .sources
            .iter()
            .map(|s| (s.name().to_string(), s.default_value()))
            .collect();
        let mut pending: Vec<&'static str> = self.sources.iter().map(|s| s.name()).collect();
        let mut warnings = Vec::new();

        let mut set = JoinSet::new();
        let mut task_names: HashMap<tokio::task::Id, &'static str> = HashMap::new();
        for source in &self.sources {
            let name = source.name();
            let source = source.clone();
            let user_id = user_id.to_string();
            let handle = set.spawn(async move {
                let result = source.fetch(&user_id).await;
                (source.name(), result)
            });
            task_names.insert(handle.id(), name);
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = set.join_next_with_id() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((_, (name, Ok(value)))) => {
                            pending.retain(|n| *n != name);
                            fields.insert(name.to_string(), value);
                        }
                        Ok((_, (name, Err(e)))) => {
                            pending.retain(|n| *n != name);
                            warn!(user_id, source = name, error = %e, "overview fetch failed");
                            warnings.push(format!("{name}: {e}"));
                        }
                        Err(e) => {
                            // Panicked or cancelled task; the field keeps its default.
                            let name = task_names.get(&e.id()).copied().unwrap_or("unknown");
                            pending.retain(|n| *n != name);
                            warn!(user_id, source = name, error = %e, "overview fetch task failed");
                            warnings.push(format!("{name}: fetch task failed"));
                        }
                    }
                }
                () = &mut deadline => {
                    set.abort_all();
                    for name in &pending {
                        warn!(user_id, source = name, "overview fetch timed out");
                        warnings.push(format!("{name}: timed out"));
                    }
                    break;
                }
            }
        }

        Overview { fields, warnings }
    }
}

/// Device posture summary backed by the device store.
pub struct DevicesSource {
    pub devices: Arc<dyn DeviceStore>,
}

#[async_trait]
impl OverviewSource for DevicesSource {
    fn name(&self) -> &'static str {
        "devices"
    }

    fn default_value(&self) -> Value {
        serde_json::json!({ "total": 0, "trusted": 0 })
    }

    async fn fetch(&self, user_id: &str) -> Result<Value, SourceError> {
        let devices = self
            .devices
            .list_devices(user_id)
            .map_err(|e| SourceError(e.to_string()))?;
        let trusted = devices.iter().filter(|d| d.is_trusted).count();
        Ok(serde_json::json!({
            "total": devices.len(),
            "trusted": trusted,
        }))
    }
}

/// Allowlist posture summary backed by the allowlist store.
pub struct AllowlistSource {
    pub allowlist: Arc<dyn IpAllowlistStore>,
}

#[async_trait]
impl OverviewSource for AllowlistSource {
    fn name(&self) -> &'static str {
        "ip_allowlist"
    }

    fn default_value(&self) -> Value {
        serde_json::json!({ "enabled": false, "entries": 0 })
    }

    async fn fetch(&self, user_id: &str) -> Result<Value, SourceError> {
        let entries = self
            .allowlist
            .list_ips(user_id)
            .map_err(|e| SourceError(e.to_string()))?;
        Ok(serde_json::json!({
            "enabled": !entries.is_empty(),
            "entries": entries.len(),
        }))
    }
}

/// Recent security activity backed by the event log.
pub struct RecentEventsSource {
    pub events: Arc<dyn SecurityEventStore>,
}

#[async_trait]
impl OverviewSource for RecentEventsSource {
    fn name(&self) -> &'static str {
        "recent_events"
    }

    fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }

    async fn fetch(&self, user_id: &str) -> Result<Value, SourceError> {
        let events = self
            .events
            .events_for_user(user_id, 5)
            .map_err(|e| SourceError(e.to_string()))?;
        serde_json::to_value(events).map_err(|e| SourceError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        name: &'static str,
        value: Value,
    }

    #[async_trait]
    impl OverviewSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _user_id: &str) -> Result<Value, SourceError> {
            Ok(self.value.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl OverviewSource for FailingSource {
        fn name(&self) -> &'static str {
            "balances"
        }

        fn default_value(&self) -> Value {
            serde_json::json!("0")
        }

        async fn fetch(&self, _user_id: &str) -> Result<Value, SourceError> {
            Err(SourceError("provider unavailable".into()))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl OverviewSource for SlowSource {
        fn name(&self) -> &'static str {
            "cards"
        }

        async fn fetch(&self, _user_id: &str) -> Result<Value, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::json!([]))
        }
    }

    #[tokio::test]
    async fn one_failure_leaves_other_fields_intact() {
        let gateway = AggregationGateway::new(vec![
            Arc::new(FixedSource {
                name: "limits",
                value: serde_json::json!({ "daily": "1000" }),
            }),
            Arc::new(FailingSource),
        ]);

        let overview = gateway.fetch_overview("user_1").await;
        assert_eq!(
            overview.fields.get("limits").unwrap(),
            &serde_json::json!({ "daily": "1000" })
        );
        // Failed fetch reports its default and a named warning.
        assert_eq!(overview.fields.get("balances").unwrap(), &serde_json::json!("0"));
        assert_eq!(overview.warnings.len(), 1);
        assert!(overview.warnings[0].starts_with("balances:"));
    }

    #[tokio::test]
    async fn deadline_defaults_slow_sources() {
        let gateway = AggregationGateway::new(vec![
            Arc::new(FixedSource {
                name: "limits",
                value: serde_json::json!({ "daily": "1000" }),
            }),
            Arc::new(SlowSource),
        ])
        .with_timeout(Duration::from_millis(50));

        let overview = gateway.fetch_overview("user_1").await;
        assert_eq!(
            overview.fields.get("limits").unwrap(),
            &serde_json::json!({ "daily": "1000" })
        );
        assert_eq!(overview.fields.get("cards").unwrap(), &Value::Null);
        assert!(overview.warnings.iter().any(|w| w == "cards: timed out"));
    }

    struct PanickingSource;

    #[async_trait]
    impl OverviewSource for PanickingSource {
        fn name(&self) -> &'static str {
            "rewards"
        }

        async fn fetch(&self, _user_id: &str) -> Result<Value, SourceError> {
            panic!("source bug");
        }
    }

    #[tokio::test]
    async fn panicked_fetch_is_warned_once_by_name() {
        let gateway = AggregationGateway::new(vec![
            Arc::new(PanickingSource),
            Arc::new(SlowSource),
        ])
        .with_timeout(Duration::from_millis(50));

        let overview = gateway.fetch_overview("user_1").await;
        // The panicked source keeps its default and is warned exactly once,
        // even though the deadline fires afterwards for the slow source.
        assert_eq!(overview.fields.get("rewards").unwrap(), &Value::Null);
        let rewards_warnings: Vec<_> = overview
            .warnings
            .iter()
            .filter(|w| w.starts_with("rewards"))
            .collect();
        assert_eq!(rewards_warnings, vec!["rewards: fetch task failed"]);
        assert!(overview.warnings.iter().any(|w| w == "cards: timed out"));
    }

    #[tokio::test]
    async fn empty_gateway_yields_empty_overview() {
        let gateway = AggregationGateway::new(Vec::new());
        let overview = gateway.fetch_overview("user_1").await;
        assert!(overview.fields.is_empty());
        assert!(overview.warnings.is_empty());
    }

    #[tokio::test]
    async fn store_backed_sources_summarize_posture() {
        use crate::store::MemoryStore;

        let store = Arc::new(MemoryStore::new());
        let gateway = AggregationGateway::new(vec![
            Arc::new(DevicesSource {
                devices: store.clone(),
            }),
            Arc::new(AllowlistSource {
                allowlist: store.clone(),
            }),
        ]);

        let overview = gateway.fetch_overview("user_1").await;
        assert!(overview.warnings.is_empty());
        assert_eq!(
            overview.fields.get("devices").unwrap(),
            &serde_json::json!({ "total": 0, "trusted": 0 })
        );
        assert_eq!(
            overview.fields.get("ip_allowlist").unwrap(),
            &serde_json::json!({ "enabled": false, "entries": 0 })
        );
    }
}
