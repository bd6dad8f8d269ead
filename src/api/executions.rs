//! Execution status endpoints

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::SharedState;
use crate::execution::Execution;

/// POST /api/executions/status - mirror the execution's handled condition
/// onto its commit
pub async fn report_status(
    AxumState(state): AxumState<SharedState>,
    Json(execution): Json<Execution>,
) -> Response {
    match state.reporter.observe(&execution).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/executions/{id}
pub async fn forget_execution(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.reporter.forget(&id);
    StatusCode::NO_CONTENT
}
