// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::aggregate::Overview;
use crate::guards::Identity;
use crate::state::AppState;

/// Aggregated account overview.
///
/// Fans out to all configured sources concurrently; a failed or slow
/// source becomes a warning plus a defaulted field, never a failed
/// request.
#[utoipa::path(
    get,
    path = "/v1/overview",
    tag = "Overview",
    responses(
        (status = 200, description = "Aggregated overview, possibly with warnings", body = Overview)
    )
)]
pub async fn get_overview(State(state): State<AppState>, identity: Identity) -> Json<Overview> {
    Json(state.overview.fetch_overview(&identity.user_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn overview_reflects_store_state() {
        let state = AppState::new(Config::default());
        state
            .ip_guard
            .add_ip("user_1", "203.0.113.1", Some("Home"))
            .unwrap();

        let Json(overview) = get_overview(
            State(state),
            Identity {
                user_id: "user_1".to_string(),
            },
        )
        .await;

        assert!(overview.warnings.is_empty());
        assert_eq!(
            overview.fields.get("ip_allowlist").unwrap(),
            &serde_json::json!({ "enabled": true, "entries": 1 })
        );
        assert_eq!(
            overview.fields.get("devices").unwrap(),
            &serde_json::json!({ "total": 0, "trusted": 0 })
        );
        // The add above is audited, so it shows up as recent activity.
        assert_eq!(
            overview.fields.get("recent_events").unwrap().as_array().unwrap().len(),
            1
        );
    }
}
