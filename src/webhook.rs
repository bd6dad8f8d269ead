//! Normalized webhook event structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;
use crate::receiver::ReceiverRef;

/// Event kinds forwarded to the execution trigger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Push,
    Merge,
    Tag,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::Merge => "merge",
            EventKind::Tag => "tag",
        }
    }
}

/// Provider-agnostic push/merge/tag notification.
/// Handed to the execution trigger and then discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub provider: ProviderKind,
    pub receiver: ReceiverRef,
    pub repository_url: String,
    pub kind: EventKind,
    pub commit: String,
    /// Full ref, e.g. `refs/heads/main` or `refs/tags/v1.0.0`
    pub git_ref: String,
    /// Short branch or tag name
    pub branch: String,
    pub author: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Strip the `refs/heads/` or `refs/tags/` prefix from a ref
pub fn short_ref(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

pub fn is_tag_ref(git_ref: &str) -> bool {
    git_ref.starts_with("refs/tags/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ref_strips_known_prefixes() {
        assert_eq!(short_ref("refs/heads/main"), "main");
        assert_eq!(short_ref("refs/heads/feature/x"), "feature/x");
        assert_eq!(short_ref("refs/tags/v1.0.0"), "v1.0.0");
        assert_eq!(short_ref("main"), "main");
    }

    #[test]
    fn tag_refs_are_detected() {
        assert!(is_tag_ref("refs/tags/v1"));
        assert!(!is_tag_ref("refs/heads/v1"));
    }
}
