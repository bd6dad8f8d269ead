//! HTTP surface: provider callbacks plus the receiver and execution API

pub mod executions;
pub mod receivers;
pub mod stats;
pub mod stream;
pub mod webhook;

use axum::{
    Json, Router,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;

use crate::SharedState;
use crate::error::HookError;

pub use executions::{forget_execution, report_status};
pub use receivers::{
    create_receiver, delete_receiver, get_receiver, list_receivers, reconcile_receiver,
};
pub use stats::root;
pub use stream::stream_events;
pub use webhook::handle_webhook;

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({
                "error": self.to_string(),
                "transient": self.is_transient(),
            })),
        )
            .into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    let hooks_route = format!(
        "/{}/{{provider}}/{{receiver}}",
        state.config.endpoint().prefix()
    );

    Router::new()
        .route("/", get(root))
        .route(&hooks_route, post(handle_webhook))
        .route("/api/receivers", get(list_receivers).post(create_receiver))
        .route(
            "/api/receivers/{reference}",
            get(get_receiver).delete(delete_receiver),
        )
        .route(
            "/api/receivers/{reference}/reconcile",
            post(reconcile_receiver),
        )
        .route("/api/executions/status", post(report_status))
        .route("/api/executions/{id}", delete(forget_execution))
        .route("/api/stream/events", get(stream_events))
        .with_state(state)
}
