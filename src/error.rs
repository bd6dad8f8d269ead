use axum::http::StatusCode;
use std::io;

use crate::execution::HandledCondition;

/// Error type for git_webhook_sync operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Provider API error: HTTP {status}: {body}")]
    ProviderApi { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Receiver not found: {0}")]
    ReceiverNotFound(String),

    #[error("Handled condition cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: HandledCondition,
        to: HandledCondition,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl HookError {
    /// True for failures the external retry layer should requeue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HookError::ProviderApi { .. } | HookError::Timeout(_) | HookError::Transport(_)
        )
    }

    /// HTTP status used when the error surfaces through the inbound API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HookError::Parse(_) | HookError::Validation(_) | HookError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            HookError::Authentication(_) => StatusCode::UNAUTHORIZED,
            HookError::ReceiverNotFound(_) => StatusCode::NOT_FOUND,
            HookError::ProviderApi { .. } | HookError::Transport(_) => StatusCode::BAD_GATEWAY,
            HookError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HookError::Configuration(_) | HookError::Io(_) | HookError::TomlParse(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for HookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HookError::Timeout(err.to_string())
        } else {
            HookError::Transport(err.to_string())
        }
    }
}

/// Helper type for Results that use HookError
pub type Result<T> = std::result::Result<T, HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_and_timeout_errors_are_transient() {
        let api = HookError::ProviderApi {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(api.is_transient());
        assert!(HookError::Timeout("deadline".into()).is_transient());
        assert!(!HookError::Authentication("bad token".into()).is_transient());
        assert!(!HookError::Configuration("no provider".into()).is_transient());
        assert!(!HookError::Parse("bad url".into()).is_transient());
    }

    #[test]
    fn errors_map_to_inbound_status_codes() {
        assert_eq!(
            HookError::Parse("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HookError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HookError::Authentication("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HookError::ReceiverNotFound("ns:r".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn provider_error_message_carries_status_and_body() {
        let err = HookError::ProviderApi {
            status: 500,
            body: "{\"message\":\"internal\"}".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("internal"));
    }
}
