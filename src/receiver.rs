//! Webhook receiver resource: "watch this repository for events".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{HookError, Result};
use crate::provider::ProviderKind;

/// Identity of a receiver, rendered as `<namespace>:<name>`.
///
/// The rendered form is the last path segment of the callback URL, so both
/// halves are restricted to URL-safe characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReceiverRef {
    namespace: String,
    name: String,
}

impl ReceiverRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        for part in [&namespace, &name] {
            if !is_valid_segment(part) {
                return Err(HookError::Parse(format!(
                    "invalid receiver reference segment '{}'",
                    part
                )));
            }
        }
        Ok(Self { namespace, name })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for ReceiverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl FromStr for ReceiverRef {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((namespace, name)) => ReceiverRef::new(namespace, name),
            None => Err(HookError::Parse(format!(
                "receiver reference '{}' is not of the form <namespace>:<name>",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ReceiverRef {
    type Error = HookError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ReceiverRef> for String {
    fn from(value: ReceiverRef) -> Self {
        value.to_string()
    }
}

/// User-declared desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSpec {
    pub repository_url: String,
    pub provider: ProviderKind,
    /// Name of the credential the [`crate::credentials::CredentialSource`] resolves.
    pub credential: String,
}

/// Remote registration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum HookState {
    Unregistered,
    /// `hook_id` is whatever the provider returned on creation, if anything.
    Registered { hook_id: Option<String> },
}

/// Server-managed observed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverStatus {
    /// Secret shared with the provider, used to authenticate inbound deliveries.
    pub token: String,
    pub hook: HookState,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookReceiver {
    pub reference: ReceiverRef,
    pub spec: ReceiverSpec,
    pub status: ReceiverStatus,
}

impl WebhookReceiver {
    /// Create an unregistered receiver with a freshly generated secret token
    pub fn new(reference: ReceiverRef, spec: ReceiverSpec) -> Self {
        Self::with_token(reference, spec, generate_token())
    }

    /// Create an unregistered receiver with a caller-supplied token
    pub fn with_token(reference: ReceiverRef, spec: ReceiverSpec, token: String) -> Self {
        Self {
            reference,
            spec,
            status: ReceiverStatus {
                token,
                hook: HookState::Unregistered,
                last_error: None,
                updated_at: Utc::now(),
            },
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.status.hook, HookState::Registered { .. })
    }

    pub fn hook_id(&self) -> Option<&str> {
        match &self.status.hook {
            HookState::Registered { hook_id } => hook_id.as_deref(),
            HookState::Unregistered => None,
        }
    }

    pub fn mark_registered(&mut self, hook_id: Option<String>) {
        self.status.hook = HookState::Registered { hook_id };
        self.status.last_error = None;
        self.status.updated_at = Utc::now();
    }

    pub fn mark_unregistered(&mut self) {
        self.status.hook = HookState::Unregistered;
        self.status.updated_at = Utc::now();
    }

    /// Record a failed attempt without touching the hook state.
    pub fn record_error(&mut self, error: &HookError) {
        self.status.last_error = Some(error.to_string());
        self.status.updated_at = Utc::now();
    }
}

/// A supplied secret must not be blank: an empty HMAC key signs anything.
pub fn check_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(HookError::Validation(
            "receiver token must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Generate a random secret token for a new receiver
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ReceiverSpec {
        ReceiverSpec {
            repository_url: "https://gitlab.example.com/acme/widgets.git".to_string(),
            provider: ProviderKind::GitLab,
            credential: "acme-gitlab".to_string(),
        }
    }

    #[test]
    fn reference_round_trips_through_display() {
        let reference: ReceiverRef = "ci:widgets".parse().unwrap();
        assert_eq!(reference.namespace(), "ci");
        assert_eq!(reference.name(), "widgets");
        assert_eq!(reference.to_string(), "ci:widgets");
    }

    #[test]
    fn reference_rejects_bad_shapes() {
        assert!("widgets".parse::<ReceiverRef>().is_err());
        assert!(":widgets".parse::<ReceiverRef>().is_err());
        assert!("ci:".parse::<ReceiverRef>().is_err());
        assert!("ci:wid/gets".parse::<ReceiverRef>().is_err());
        assert!("ci:a:b".parse::<ReceiverRef>().is_err());
    }

    #[test]
    fn new_receiver_is_unregistered_with_token() {
        let receiver = WebhookReceiver::new("ci:widgets".parse().unwrap(), spec());
        assert!(!receiver.is_registered());
        assert_eq!(receiver.hook_id(), None);
        assert_eq!(receiver.status.token.len(), 64);
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn registration_clears_previous_error() {
        let mut receiver =
            WebhookReceiver::with_token("ci:widgets".parse().unwrap(), spec(), "abc123".into());
        receiver.record_error(&HookError::Timeout("slow".into()));
        assert!(receiver.status.last_error.is_some());
        assert!(!receiver.is_registered());

        receiver.mark_registered(Some("42".to_string()));
        assert!(receiver.is_registered());
        assert_eq!(receiver.hook_id(), Some("42"));
        assert!(receiver.status.last_error.is_none());
    }

    #[test]
    fn receiver_serializes_reference_as_string() {
        let receiver =
            WebhookReceiver::with_token("ci:widgets".parse().unwrap(), spec(), "abc123".into());
        let value = serde_json::to_value(&receiver).unwrap();
        assert_eq!(value["reference"], "ci:widgets");
        assert_eq!(value["spec"]["provider"], "gitlab");
        assert_eq!(value["status"]["hook"]["state"], "unregistered");
    }

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(matches!(check_token(""), Err(HookError::Validation(_))));
        assert!(matches!(check_token("  "), Err(HookError::Validation(_))));
        assert!(check_token("abc123").is_ok());
        assert!(check_token(&generate_token()).is_ok());
    }
}
