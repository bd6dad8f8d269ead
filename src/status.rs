//! Status Reporter: mirrors an execution's handled condition onto the
//! originating commit as a provider-native status.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::credentials::CredentialSource;
use crate::error::{HookError, Result};
use crate::execution::{Execution, HandledCondition};
use crate::provider::{HookProvider, ProviderRegistry};
use crate::store::ReceiverStore;

/// Context/key attached to every status so providers group our updates.
pub const STATUS_CONTEXT: &str = "continuous-integration/webhook-sync";

const DESC_PENDING: &str = "build is pending";
const DESC_RUNNING: &str = "build is running";
const DESC_SUCCESS: &str = "build is success";
const DESC_FAILURE: &str = "build is failure";

/// Provider-neutral commit status vocabulary
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Running,
    Success,
    Failure,
}

/// Map a handled condition to its status and description.
pub fn describe(condition: HandledCondition) -> (CommitState, &'static str) {
    match condition {
        HandledCondition::Unset => (CommitState::Pending, DESC_PENDING),
        HandledCondition::Unknown => (CommitState::Running, DESC_RUNNING),
        HandledCondition::True => (CommitState::Success, DESC_SUCCESS),
        HandledCondition::False => (CommitState::Failure, DESC_FAILURE),
    }
}

/// What happened to one observation
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ReportOutcome {
    Posted { state: CommitState },
    /// The same state was already posted successfully for this execution.
    Unchanged { state: CommitState },
}

/// Posts commit statuses, one outbound attempt per observation.
///
/// Only successful posts are remembered, so re-observing an execution whose
/// last post failed tries again even when its condition has not changed.
/// Once a terminal condition has been posted, observations that would move
/// the commit back are refused.
#[derive(Clone)]
pub struct StatusReporter {
    registry: Arc<ProviderRegistry>,
    receivers: Arc<dyn ReceiverStore>,
    credentials: Arc<dyn CredentialSource>,
    reported: Arc<Mutex<HashMap<String, HandledCondition>>>,
}

impl StatusReporter {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        receivers: Arc<dyn ReceiverStore>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            registry,
            receivers,
            credentials,
            reported: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Observe the execution's current condition and post it if it differs
    /// from what was last posted.
    pub async fn observe(&self, execution: &Execution) -> Result<ReportOutcome> {
        let condition = execution.handled();
        let (state, _) = describe(condition);
        if let Some(last) = self.last_reported(&execution.id) {
            if last == condition {
                debug!(
                    execution = %execution.id,
                    "status {:?} already reported, skipping", state
                );
                return Ok(ReportOutcome::Unchanged { state });
            }
            if !last.can_become(condition) {
                warn!(
                    execution = %execution.id,
                    "refusing to move reported condition {:?} to {:?}", last, condition
                );
                return Err(HookError::InvalidTransition {
                    from: last,
                    to: condition,
                });
            }
        }

        let receiver = self
            .receivers
            .get(&execution.receiver)
            .await?
            .ok_or_else(|| HookError::ReceiverNotFound(execution.receiver.to_string()))?;
        let remote = self.registry.get(receiver.spec.provider)?;
        let token = self.credentials.access_token(&receiver.spec.credential).await?;

        match remote.update_status(execution, &token).await {
            Ok(()) => {
                self.remember(&execution.id, condition);
                info!(
                    execution = %execution.id,
                    receiver = %execution.receiver,
                    "reported status {:?} for commit {}", state, execution.commit
                );
                Ok(ReportOutcome::Posted { state })
            }
            Err(e) => {
                warn!(
                    execution = %execution.id,
                    receiver = %execution.receiver,
                    "failed to report status {:?}: {}", state, e
                );
                Err(e)
            }
        }
    }

    /// Drop the record for an execution that no longer exists.
    pub fn forget(&self, execution_id: &str) {
        if let Ok(mut reported) = self.reported.lock() {
            reported.remove(execution_id);
        }
    }

    fn last_reported(&self, execution_id: &str) -> Option<HandledCondition> {
        self.reported
            .lock()
            .ok()
            .and_then(|reported| reported.get(execution_id).copied())
    }

    fn remember(&self, execution_id: &str, condition: HandledCondition) {
        if let Ok(mut reported) = self.reported.lock() {
            reported.insert(execution_id.to_string(), condition);
        }
    }
}
