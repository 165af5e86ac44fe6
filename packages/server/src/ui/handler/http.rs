//! HTTP endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State, response::Html};

use crate::{infrastructure::dto::http::GroupSummaryDto, ui::state::AppState};

/// Chat page served at `/`
const INDEX_HTML: &str = include_str!("../../../static/index.html");

/// Static chat page
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// List groups and their members (for debugging and tests)
pub async fn list_groups(State(state): State<Arc<AppState>>) -> Json<Vec<GroupSummaryDto>> {
    let groups = state
        .hub
        .group_summaries()
        .await
        .into_iter()
        .map(GroupSummaryDto::from)
        .collect();
    Json(groups)
}
