//! Build status shape shared by Bitbucket Cloud and Bitbucket Server

use serde::Serialize;

use super::StatusUpdate;
use crate::status::CommitState;

#[derive(Debug, Serialize)]
pub(super) struct BuildStatusBody<'a> {
    state: &'static str,
    key: &'a str,
    url: &'a str,
    description: &'a str,
}

impl<'a> BuildStatusBody<'a> {
    pub(super) fn new(status: &StatusUpdate<'a>) -> Self {
        Self {
            state: build_state(status.state),
            key: status.context,
            url: status.target_url,
            description: status.description,
        }
    }
}

/// Bitbucket has no separate pending state
fn build_state(state: CommitState) -> &'static str {
    match state {
        CommitState::Pending | CommitState::Running => "INPROGRESS",
        CommitState::Success => "SUCCESSFUL",
        CommitState::Failure => "FAILED",
    }
}
