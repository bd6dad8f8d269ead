//! Provider payload normalization.
//!
//! Each parser takes the provider's event-type header and JSON body and
//! returns `Ok(None)` for deliveries that are valid but not forwarded
//! (pings, closed pull requests, branch deletions).

use serde_json::Value;

use crate::error::{HookError, Result};
use crate::webhook::{EventKind, is_tag_ref};

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Provider-neutral fields extracted from one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub kind: EventKind,
    pub commit: String,
    pub git_ref: String,
    pub author: Option<String>,
}

pub fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| HookError::Parse(format!("could not parse JSON body: {}", e)))
}

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn required<'a>(payload: &'a Value, pointer: &str) -> Result<&'a str> {
    str_at(payload, pointer)
        .ok_or_else(|| HookError::Validation(format!("missing required field {}", pointer)))
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(String::from)
}

fn ref_kind(git_ref: &str) -> EventKind {
    if is_tag_ref(git_ref) {
        EventKind::Tag
    } else {
        EventKind::Push
    }
}

/// `X-GitHub-Event`: push, pull_request
pub fn github(event: &str, body: &[u8]) -> Result<Option<ParsedEvent>> {
    match event {
        "push" => {
            let payload = parse_json(body)?;
            if payload.get("deleted").and_then(Value::as_bool) == Some(true) {
                return Ok(None);
            }
            let git_ref = required(&payload, "/ref")?;
            let commit = required(&payload, "/after")?;
            if commit == ZERO_SHA {
                return Ok(None);
            }
            Ok(Some(ParsedEvent {
                kind: ref_kind(git_ref),
                commit: commit.to_string(),
                git_ref: git_ref.to_string(),
                author: owned(
                    str_at(&payload, "/head_commit/author/name")
                        .or_else(|| str_at(&payload, "/pusher/name")),
                ),
            }))
        }
        "pull_request" => {
            let payload = parse_json(body)?;
            let action = str_at(&payload, "/action").unwrap_or_default();
            if !matches!(action, "opened" | "synchronize" | "reopened") {
                return Ok(None);
            }
            let commit = required(&payload, "/pull_request/head/sha")?;
            let branch = required(&payload, "/pull_request/head/ref")?;
            Ok(Some(ParsedEvent {
                kind: EventKind::Merge,
                commit: commit.to_string(),
                git_ref: format!("refs/heads/{}", branch),
                author: owned(str_at(&payload, "/pull_request/user/login")),
            }))
        }
        _ => Ok(None),
    }
}

/// `X-Gitlab-Event`: Push Hook, Tag Push Hook, Merge Request Hook
pub fn gitlab(event: &str, body: &[u8]) -> Result<Option<ParsedEvent>> {
    match event {
        "Push Hook" | "Tag Push Hook" => {
            let payload = parse_json(body)?;
            let git_ref = required(&payload, "/ref")?;
            // checkout_sha is null when the branch or tag was deleted
            let Some(commit) = str_at(&payload, "/checkout_sha") else {
                if payload.get("checkout_sha").is_some_and(Value::is_null) {
                    return Ok(None);
                }
                return Err(HookError::Validation(
                    "missing required field /checkout_sha".to_string(),
                ));
            };
            let kind = if event == "Tag Push Hook" {
                EventKind::Tag
            } else {
                ref_kind(git_ref)
            };
            Ok(Some(ParsedEvent {
                kind,
                commit: commit.to_string(),
                git_ref: git_ref.to_string(),
                author: owned(str_at(&payload, "/user_name")),
            }))
        }
        "Merge Request Hook" => {
            let payload = parse_json(body)?;
            let action = str_at(&payload, "/object_attributes/action").unwrap_or("open");
            if !matches!(action, "open" | "reopen" | "update") {
                return Ok(None);
            }
            let commit = required(&payload, "/object_attributes/last_commit/id")?;
            let branch = required(&payload, "/object_attributes/source_branch")?;
            Ok(Some(ParsedEvent {
                kind: EventKind::Merge,
                commit: commit.to_string(),
                git_ref: format!("refs/heads/{}", branch),
                author: owned(str_at(&payload, "/user/username")),
            }))
        }
        _ => Ok(None),
    }
}

/// `X-Event-Key`: repo:push, pullrequest:created, pullrequest:updated
pub fn bitbucket_cloud(event: &str, body: &[u8]) -> Result<Option<ParsedEvent>> {
    match event {
        "repo:push" => {
            let payload = parse_json(body)?;
            let changes = payload
                .pointer("/push/changes")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    HookError::Validation("missing required field /push/changes".to_string())
                })?;
            // `new` is null for deleted branches and tags
            let Some(new) = changes
                .iter()
                .find_map(|c| c.get("new").filter(|n| !n.is_null()))
            else {
                return Ok(None);
            };
            let name = required(new, "/name")?;
            let commit = required(new, "/target/hash")?;
            let (kind, git_ref) = match str_at(new, "/type") {
                Some("tag") => (EventKind::Tag, format!("refs/tags/{}", name)),
                _ => (EventKind::Push, format!("refs/heads/{}", name)),
            };
            Ok(Some(ParsedEvent {
                kind,
                commit: commit.to_string(),
                git_ref,
                author: owned(str_at(&payload, "/actor/display_name")),
            }))
        }
        "pullrequest:created" | "pullrequest:updated" => {
            let payload = parse_json(body)?;
            let commit = required(&payload, "/pullrequest/source/commit/hash")?;
            let branch = required(&payload, "/pullrequest/source/branch/name")?;
            Ok(Some(ParsedEvent {
                kind: EventKind::Merge,
                commit: commit.to_string(),
                git_ref: format!("refs/heads/{}", branch),
                author: owned(str_at(&payload, "/actor/display_name")),
            }))
        }
        _ => Ok(None),
    }
}

/// `X-Event-Key`: repo:refs_changed, pr:opened, pr:from_ref_updated
pub fn bitbucket_server(event: &str, body: &[u8]) -> Result<Option<ParsedEvent>> {
    match event {
        "repo:refs_changed" => {
            let payload = parse_json(body)?;
            let changes = payload
                .get("changes")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    HookError::Validation("missing required field /changes".to_string())
                })?;
            let Some(change) = changes
                .iter()
                .find(|c| str_at(c, "/type") != Some("DELETE"))
            else {
                return Ok(None);
            };
            let git_ref = required(change, "/ref/id")?;
            let commit = required(change, "/toHash")?;
            let kind = match str_at(change, "/ref/type") {
                Some("TAG") => EventKind::Tag,
                _ => ref_kind(git_ref),
            };
            Ok(Some(ParsedEvent {
                kind,
                commit: commit.to_string(),
                git_ref: git_ref.to_string(),
                author: owned(str_at(&payload, "/actor/name")),
            }))
        }
        "pr:opened" | "pr:from_ref_updated" => {
            let payload = parse_json(body)?;
            let commit = required(&payload, "/pullRequest/fromRef/latestCommit")?;
            let git_ref = required(&payload, "/pullRequest/fromRef/id")?;
            Ok(Some(ParsedEvent {
                kind: EventKind::Merge,
                commit: commit.to_string(),
                git_ref: git_ref.to_string(),
                author: owned(str_at(&payload, "/actor/name")),
            }))
        }
        _ => Ok(None),
    }
}
