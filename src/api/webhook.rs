//! Provider callback entry point

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::SharedState;
use crate::dispatch::DispatchOutcome;

/// POST /<prefix>/{provider}/{receiver} - accept one provider delivery.
///
/// 200 for forwarded and ignored events alike, so provider pings succeed.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Path((provider, receiver)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .dispatcher
        .dispatch(&provider, &receiver, &headers, &body)
        .await
    {
        Ok(DispatchOutcome::Forwarded(event)) => (
            StatusCode::OK,
            Json(json!({
                "status": "accepted",
                "kind": event.kind,
                "ref": event.git_ref,
                "commit": event.commit,
            })),
        )
            .into_response(),
        Ok(DispatchOutcome::Ignored { event }) => {
            info!("Ignored '{}' delivery for {}/{}", event, provider, receiver);
            (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "event": event })),
            )
                .into_response()
        }
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("Webhook for {}/{} failed: {}", provider, receiver, e);
            } else {
                warn!("Webhook for {}/{} rejected: {}", provider, receiver, e);
            }
            e.into_response()
        }
    }
}
