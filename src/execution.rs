use serde::{Deserialize, Serialize};

use crate::error::{HookError, Result};
use crate::receiver::ReceiverRef;

/// Tri-state progress marker of an execution, plus the "never set" state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HandledCondition {
    #[default]
    Unset,
    Unknown,
    True,
    False,
}

impl HandledCondition {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandledCondition::True | HandledCondition::False)
    }

    /// Whether moving from `self` to `next` keeps the condition monotonic.
    pub fn can_become(self, next: HandledCondition) -> bool {
        if self.is_terminal() {
            return next == self;
        }
        match self {
            HandledCondition::Unknown => next != HandledCondition::Unset,
            _ => true,
        }
    }
}

/// One triggered build for a specific commit of a receiver's repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub receiver: ReceiverRef,
    pub repository_url: String,
    pub commit: String,
    /// Link shown next to the commit status on the provider
    pub status_url: String,
    #[serde(default)]
    handled: HandledCondition,
}

impl Execution {
    pub fn new(
        id: impl Into<String>,
        receiver: ReceiverRef,
        repository_url: impl Into<String>,
        commit: impl Into<String>,
        status_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            receiver,
            repository_url: repository_url.into(),
            commit: commit.into(),
            status_url: status_url.into(),
            handled: HandledCondition::Unset,
        }
    }

    pub fn handled(&self) -> HandledCondition {
        self.handled
    }

    /// Move the handled condition forward, refusing to leave a terminal state.
    pub fn set_handled(&mut self, next: HandledCondition) -> Result<()> {
        if !self.handled.can_become(next) {
            return Err(HookError::InvalidTransition {
                from: self.handled,
                to: next,
            });
        }
        self.handled = next;
        Ok(())
    }

    pub fn with_handled(mut self, next: HandledCondition) -> Result<Self> {
        self.set_handled(next)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> Execution {
        Execution::new(
            "exec-1",
            "ci:widgets".parse().unwrap(),
            "https://gitlab.example.com/acme/widgets.git",
            "0123abcd",
            "https://ci.example.com/executions/exec-1",
        )
    }

    #[test]
    fn new_execution_starts_unset() {
        assert_eq!(execution().handled(), HandledCondition::Unset);
    }

    #[test]
    fn progresses_from_unknown_to_terminal() {
        let mut exec = execution();
        exec.set_handled(HandledCondition::Unknown).unwrap();
        exec.set_handled(HandledCondition::True).unwrap();
        assert_eq!(exec.handled(), HandledCondition::True);
    }

    #[test]
    fn terminal_condition_does_not_revert() {
        let mut exec = execution().with_handled(HandledCondition::False).unwrap();
        let err = exec.set_handled(HandledCondition::Unknown).unwrap_err();
        assert!(matches!(err, HookError::InvalidTransition { .. }));
        assert!(exec.set_handled(HandledCondition::True).is_err());
        assert_eq!(exec.handled(), HandledCondition::False);

        // Re-observing the same terminal value is fine.
        exec.set_handled(HandledCondition::False).unwrap();
    }

    #[test]
    fn running_does_not_go_back_to_unset() {
        let mut exec = execution().with_handled(HandledCondition::Unknown).unwrap();
        assert!(exec.set_handled(HandledCondition::Unset).is_err());
    }

    #[test]
    fn missing_handled_field_deserializes_as_unset() {
        let exec: Execution = serde_json::from_value(serde_json::json!({
            "id": "exec-2",
            "receiver": "ci:widgets",
            "repository_url": "https://github.com/acme/widgets.git",
            "commit": "ffff",
            "status_url": "https://ci.example.com/e/2"
        }))
        .unwrap();
        assert_eq!(exec.handled(), HandledCondition::Unset);
    }
}
