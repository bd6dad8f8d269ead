//! Inbound Dispatcher.
//!
//! Resolves the receiver named in the callback path, authenticates the
//! delivery against the receiver's secret token, normalizes the payload and
//! hands it to the [`ExecutionTrigger`]. Every request is independent; the
//! dispatcher only reads receiver state.

pub mod payload;
pub mod signature;

use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{HookError, Result};
use crate::provider::ProviderKind;
use crate::receiver::{ReceiverRef, WebhookReceiver};
use crate::store::ReceiverStore;
use crate::trigger::ExecutionTrigger;
use crate::webhook::{NormalizedEvent, short_ref};

use payload::ParsedEvent;
use signature::{verify_hmac_signature, verify_token};

pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
pub const BITBUCKET_SIGNATURE_HEADER: &str = "x-hub-signature";
pub const BITBUCKET_EVENT_HEADER: &str = "x-event-key";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum DispatchOutcome {
    Forwarded(NormalizedEvent),
    /// Authenticated, but not an event kind that starts an execution.
    Ignored { event: String },
}

#[derive(Clone)]
pub struct Dispatcher {
    receivers: Arc<dyn ReceiverStore>,
    trigger: Arc<dyn ExecutionTrigger>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl Dispatcher {
    pub fn new(receivers: Arc<dyn ReceiverStore>, trigger: Arc<dyn ExecutionTrigger>) -> Self {
        Self { receivers, trigger }
    }

    /// Handle one delivery to `<prefix>/<provider>/<receiver>`.
    pub async fn dispatch(
        &self,
        provider: &str,
        receiver: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<DispatchOutcome> {
        let receiver = self.resolve(provider, receiver).await?;
        let kind = receiver.spec.provider;

        authenticate(kind, &receiver.status.token, headers, body).inspect_err(|e| {
            warn!(receiver = %receiver.reference, provider = %kind, "rejected delivery: {}", e);
        })?;

        let event_name = event_name(kind, headers).unwrap_or_default();
        let parsed = match kind {
            ProviderKind::GitHub => payload::github(event_name, body),
            ProviderKind::GitLab => payload::gitlab(event_name, body),
            ProviderKind::BitbucketCloud => payload::bitbucket_cloud(event_name, body),
            ProviderKind::BitbucketServer => payload::bitbucket_server(event_name, body),
        }?;

        let Some(parsed) = parsed else {
            debug!(
                receiver = %receiver.reference,
                provider = %kind,
                "ignoring '{}' delivery", event_name
            );
            return Ok(DispatchOutcome::Ignored {
                event: event_name.to_string(),
            });
        };

        let event = normalize(&receiver, parsed);
        info!(
            receiver = %receiver.reference,
            provider = %kind,
            "{:?} event for {} at {}", event.kind, event.git_ref, event.commit
        );
        self.trigger.trigger(event.clone()).await?;
        Ok(DispatchOutcome::Forwarded(event))
    }

    /// Unknown provider, malformed reference, missing receiver and a
    /// provider that does not match the receiver all look the same: 404.
    async fn resolve(&self, provider: &str, receiver: &str) -> Result<WebhookReceiver> {
        let not_found = || HookError::ReceiverNotFound(format!("{}/{}", provider, receiver));
        let kind: ProviderKind = provider.parse().map_err(|_| not_found())?;
        let reference: ReceiverRef = receiver.parse().map_err(|_| not_found())?;
        let found = self.receivers.get(&reference).await?.ok_or_else(not_found)?;
        if found.spec.provider != kind {
            return Err(not_found());
        }
        Ok(found)
    }
}

fn event_name(kind: ProviderKind, headers: &HeaderMap) -> Option<&str> {
    match kind {
        ProviderKind::GitHub => header(headers, GITHUB_EVENT_HEADER),
        ProviderKind::GitLab => header(headers, GITLAB_EVENT_HEADER),
        ProviderKind::BitbucketCloud | ProviderKind::BitbucketServer => {
            header(headers, BITBUCKET_EVENT_HEADER)
        }
    }
}

/// Checked before the body is parsed, so ignored event kinds still need a
/// valid signature.
fn authenticate(kind: ProviderKind, secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let (name, valid) = match kind {
        ProviderKind::GitHub => (
            GITHUB_SIGNATURE_HEADER,
            header(headers, GITHUB_SIGNATURE_HEADER)
                .map(|sig| verify_hmac_signature(secret, body, sig)),
        ),
        ProviderKind::GitLab => (
            GITLAB_TOKEN_HEADER,
            header(headers, GITLAB_TOKEN_HEADER).map(|token| verify_token(secret, token)),
        ),
        ProviderKind::BitbucketCloud | ProviderKind::BitbucketServer => (
            BITBUCKET_SIGNATURE_HEADER,
            header(headers, BITBUCKET_SIGNATURE_HEADER)
                .map(|sig| verify_hmac_signature(secret, body, sig)),
        ),
    };
    match valid {
        Some(true) => Ok(()),
        Some(false) => Err(HookError::Authentication(format!("{} does not match", name))),
        None => Err(HookError::Authentication(format!("missing {} header", name))),
    }
}

fn normalize(receiver: &WebhookReceiver, parsed: ParsedEvent) -> NormalizedEvent {
    NormalizedEvent {
        provider: receiver.spec.provider,
        receiver: receiver.reference.clone(),
        repository_url: receiver.spec.repository_url.clone(),
        kind: parsed.kind,
        branch: short_ref(&parsed.git_ref).to_string(),
        commit: parsed.commit,
        git_ref: parsed.git_ref,
        author: parsed.author,
        received_at: Utc::now(),
    }
}
