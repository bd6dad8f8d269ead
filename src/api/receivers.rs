//! Receiver API endpoints

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{HookError, Result};
use crate::lifecycle::ReconcileOutcome;
use crate::receiver::{HookState, ReceiverRef, ReceiverSpec, WebhookReceiver};
use crate::{ReceiverConfig, SharedState};

/// Receiver as exposed over the API. The secret token is never returned.
#[derive(Debug, Serialize)]
pub struct ReceiverView {
    pub reference: ReceiverRef,
    pub spec: ReceiverSpec,
    pub hook: HookState,
    pub callback_url: String,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReceiverView {
    fn new(state: &SharedState, receiver: WebhookReceiver) -> Self {
        let callback_url = state
            .config
            .endpoint()
            .callback_url(receiver.spec.provider, &receiver.reference);
        Self {
            reference: receiver.reference,
            spec: receiver.spec,
            hook: receiver.status.hook,
            callback_url,
            last_error: receiver.status.last_error,
            updated_at: receiver.status.updated_at,
        }
    }
}

fn outcome_response(reference: &ReceiverRef, outcome: ReconcileOutcome) -> Response {
    Json(json!({ "receiver": reference, "outcome": outcome })).into_response()
}

/// GET /api/receivers
pub async fn list_receivers(AxumState(state): AxumState<SharedState>) -> Response {
    match state.receivers.list().await {
        Ok(receivers) => {
            let views: Vec<_> = receivers
                .into_iter()
                .map(|r| ReceiverView::new(&state, r))
                .collect();
            Json(views).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /api/receivers/{reference}
pub async fn get_receiver(
    AxumState(state): AxumState<SharedState>,
    Path(reference): Path<String>,
) -> Response {
    match find_receiver(&state, &reference).await {
        Ok(receiver) => Json(ReceiverView::new(&state, receiver)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn find_receiver(state: &SharedState, reference: &str) -> Result<WebhookReceiver> {
    let reference: ReceiverRef = reference.parse()?;
    state
        .receivers
        .get(&reference)
        .await?
        .ok_or_else(|| HookError::ReceiverNotFound(reference.to_string()))
}

/// POST /api/receivers - declare a receiver and register its hook.
///
/// A failed registration keeps the receiver (with `last_error` set) so a
/// later reconcile can retry it.
pub async fn create_receiver(
    AxumState(state): AxumState<SharedState>,
    Json(request): Json<ReceiverConfig>,
) -> Response {
    let receiver = match new_receiver(&state, &request).await {
        Ok(receiver) => receiver,
        Err(e) => return e.into_response(),
    };
    let reference = receiver.reference.clone();
    match state.receivers.insert(receiver).await {
        Ok(true) => {}
        Ok(false) => return already_exists(&reference).into_response(),
        Err(e) => return e.into_response(),
    }
    info!(receiver = %reference, "receiver declared");

    match state.lifecycle.reconcile(&state.leader, &reference).await {
        Ok(outcome) => {
            let view = match state.receivers.get(&reference).await {
                Ok(Some(receiver)) => Some(ReceiverView::new(&state, receiver)),
                _ => None,
            };
            (
                StatusCode::CREATED,
                Json(json!({ "receiver": view, "outcome": outcome })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(receiver = %reference, "initial registration failed: {}", e);
            e.into_response()
        }
    }
}

async fn new_receiver(state: &SharedState, request: &ReceiverConfig) -> Result<WebhookReceiver> {
    let receiver = request.to_receiver(&state.config.server.namespace)?;
    if state.registry.get(receiver.spec.provider).is_err() {
        return Err(HookError::Validation(format!(
            "provider '{}' is not configured",
            receiver.spec.provider
        )));
    }
    if state.receivers.get(&receiver.reference).await?.is_some() {
        return Err(already_exists(&receiver.reference));
    }
    Ok(receiver)
}

fn already_exists(reference: &ReceiverRef) -> HookError {
    HookError::Validation(format!("receiver '{}' already exists", reference))
}

/// POST /api/receivers/{reference}/reconcile
pub async fn reconcile_receiver(
    AxumState(state): AxumState<SharedState>,
    Path(reference): Path<String>,
) -> Response {
    let reference: ReceiverRef = match reference.parse() {
        Ok(reference) => reference,
        Err(e) => return e.into_response(),
    };
    match state.lifecycle.reconcile(&state.leader, &reference).await {
        Ok(outcome) => outcome_response(&reference, outcome),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/receivers/{reference} - remove the remote hook, then the receiver
pub async fn delete_receiver(
    AxumState(state): AxumState<SharedState>,
    Path(reference): Path<String>,
) -> Response {
    let reference: ReceiverRef = match reference.parse() {
        Ok(reference) => reference,
        Err(e) => return e.into_response(),
    };
    match state.lifecycle.finalize(&state.leader, &reference).await {
        Ok(outcome) => outcome_response(&reference, outcome),
        Err(e) => e.into_response(),
    }
}
