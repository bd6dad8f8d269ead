//! Credential resolution for outbound provider calls

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{HookError, Result};

/// Resolves a receiver's credential reference to a provider access token.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn access_token(&self, credential: &str) -> Result<String>;
}

/// `[credentials.<name>]` entry: an inline token or the name of an env var holding one
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialConfig {
    pub token: Option<String>,
    pub token_env: Option<String>,
}

/// Credentials declared in the config file
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, CredentialConfig>,
}

impl StaticCredentials {
    pub fn new(entries: HashMap<String, CredentialConfig>) -> Self {
        Self { entries }
    }

    fn resolve(&self, credential: &str) -> Result<String> {
        let entry = self.entries.get(credential).ok_or_else(|| {
            HookError::Configuration(format!("credential '{}' is not configured", credential))
        })?;

        let token = match (&entry.token, &entry.token_env) {
            (Some(token), _) => token.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                HookError::Configuration(format!(
                    "credential '{}' reads unset environment variable '{}'",
                    credential, var
                ))
            })?,
            (None, None) => {
                return Err(HookError::Configuration(format!(
                    "credential '{}' has neither token nor token_env",
                    credential
                )));
            }
        };

        if token.trim().is_empty() {
            return Err(HookError::Configuration(format!(
                "credential '{}' resolved to an empty token",
                credential
            )));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn access_token(&self, credential: &str) -> Result<String> {
        self.resolve(credential)
    }
}
