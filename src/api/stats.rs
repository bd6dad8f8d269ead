//! Health endpoint

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::collections::HashMap;

use crate::SharedState;

/// Server statistics
#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub leader: bool,
    pub providers: Vec<String>,
    pub total_receivers: usize,
    pub registered_receivers: usize,
}

/// GET / - plain health text, or `?format=json` for server statistics
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("format").map(String::as_str) != Some("json") {
        return "git_webhook_sync is running".into_response();
    }

    let receivers = state.receivers.list().await.unwrap_or_default();
    let mut providers: Vec<String> = state
        .registry
        .kinds()
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    providers.sort();

    Json(ServerStats {
        name: "git_webhook_sync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        leader: state.leader.is_active(),
        providers,
        total_receivers: receivers.len(),
        registered_receivers: receivers.iter().filter(|r| r.is_registered()).count(),
    })
    .into_response()
}
