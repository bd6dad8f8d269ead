pub mod api;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod lifecycle;
pub mod logging;
pub mod provider;
pub mod receiver;
pub mod status;
pub mod store;
pub mod trigger;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_utils;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use credentials::{CredentialConfig, CredentialSource, StaticCredentials};
use dispatch::Dispatcher;
use error::{HookError, Result};
use lifecycle::{HookLifecycleManager, LeaderContext};
use provider::{HookEndpoint, ProviderKind, ProviderRegistry};
use receiver::{ReceiverRef, ReceiverSpec, WebhookReceiver, check_token};
use status::StatusReporter;
use store::{MemoryReceiverStore, ReceiverStore};
use trigger::BroadcastTrigger;

pub const DEFAULT_CONFIG_PATH: &str = "webhook_sync.toml";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,
    #[serde(default, rename = "receiver")]
    pub receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Externally reachable base URL providers deliver to
    pub public_url: String,
    #[serde(default = "default_hooks_prefix")]
    pub hooks_prefix: String,
    /// Namespace for receivers declared without one
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Receivers reconciled concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub directory: Option<PathBuf>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            max_files: default_max_files(),
        }
    }
}

/// One git host. `hostname` selects a self-hosted instance; `api_url`
/// overrides the derived API base entirely.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub hostname: Option<String>,
    #[serde(default = "default_tls")]
    pub tls: bool,
    pub api_url: Option<String>,
}

impl ProviderConfig {
    pub fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }
}

/// A receiver declared in the config file and reconciled at startup
#[derive(Debug, Deserialize, Clone)]
pub struct ReceiverConfig {
    pub name: String,
    pub namespace: Option<String>,
    pub repository_url: String,
    pub provider: ProviderKind,
    pub credential: String,
    /// Fixed secret token; generated when absent
    pub token: Option<String>,
}

impl ReceiverConfig {
    pub fn reference(&self, default_namespace: &str) -> Result<ReceiverRef> {
        let namespace = self.namespace.as_deref().unwrap_or(default_namespace);
        ReceiverRef::new(namespace, self.name.as_str())
    }

    pub fn to_receiver(&self, default_namespace: &str) -> Result<WebhookReceiver> {
        let reference = self.reference(default_namespace)?;
        let spec = ReceiverSpec {
            repository_url: self.repository_url.clone(),
            provider: self.provider,
            credential: self.credential.clone(),
        };
        Ok(match &self.token {
            Some(token) => {
                check_token(token)?;
                WebhookReceiver::with_token(reference, spec, token.clone())
            }
            None => WebhookReceiver::new(reference, spec),
        })
    }
}

fn default_listen_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_hooks_prefix() -> String {
    "hooks".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    5
}

fn default_tls() -> bool {
    true
}

impl AppConfig {
    pub fn endpoint(&self) -> HookEndpoint {
        HookEndpoint::new(&self.server.public_url, &self.server.hooks_prefix)
    }

    pub fn validate(&self) -> Result<()> {
        let public_url = Url::parse(&self.server.public_url).map_err(|e| {
            HookError::Configuration(format!(
                "server.public_url '{}' is not a valid URL: {}",
                self.server.public_url, e
            ))
        })?;
        if !matches!(public_url.scheme(), "http" | "https") {
            return Err(HookError::Configuration(format!(
                "server.public_url '{}' must be http or https",
                self.server.public_url
            )));
        }
        let prefix = self.server.hooks_prefix.trim_matches('/');
        if prefix.is_empty() || prefix == "api" {
            return Err(HookError::Configuration(format!(
                "server.hooks_prefix '{}' is empty or reserved",
                self.server.hooks_prefix
            )));
        }

        let mut kinds = HashSet::new();
        for provider in &self.providers {
            if !kinds.insert(provider.kind) {
                return Err(HookError::Configuration(format!(
                    "provider '{}' configured more than once",
                    provider.kind
                )));
            }
            if provider.kind == ProviderKind::BitbucketServer
                && provider.hostname.is_none()
                && provider.api_url.is_none()
            {
                return Err(HookError::Configuration(
                    "bitbucketserver requires a hostname".to_string(),
                ));
            }
        }

        let mut references = HashSet::new();
        for receiver in &self.receivers {
            let reference = receiver
                .reference(&self.server.namespace)
                .map_err(|e| HookError::Configuration(e.to_string()))?;
            if !kinds.contains(&receiver.provider) {
                return Err(HookError::Configuration(format!(
                    "receiver '{}' uses provider '{}' which is not configured",
                    reference, receiver.provider
                )));
            }
            if !self.credentials.contains_key(&receiver.credential) {
                return Err(HookError::Configuration(format!(
                    "receiver '{}' uses credential '{}' which is not configured",
                    reference, receiver.credential
                )));
            }
            if let Some(token) = &receiver.token {
                check_token(token).map_err(|e| {
                    HookError::Configuration(format!("receiver '{}': {}", reference, e))
                })?;
            }
            if !references.insert(reference.clone()) {
                return Err(HookError::Configuration(format!(
                    "receiver '{}' declared more than once",
                    reference
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate the configuration file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        HookError::Configuration(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub struct AppState {
    pub config: AppConfig,
    pub receivers: Arc<dyn ReceiverStore>,
    pub registry: Arc<ProviderRegistry>,
    pub lifecycle: HookLifecycleManager,
    pub dispatcher: Dispatcher,
    pub reporter: StatusReporter,
    pub leader: LeaderContext,
    pub events: BroadcastTrigger,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// In-memory receivers and credentials from the config file
    pub fn from_config(config: AppConfig, leader: LeaderContext) -> Result<Self> {
        let credentials = Arc::new(StaticCredentials::new(config.credentials.clone()));
        Self::build(
            config,
            Arc::new(MemoryReceiverStore::new()),
            credentials,
            leader,
        )
    }

    pub fn build(
        config: AppConfig,
        receivers: Arc<dyn ReceiverStore>,
        credentials: Arc<dyn CredentialSource>,
        leader: LeaderContext,
    ) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::from_config(
            &config.providers,
            &config.endpoint(),
        )?);
        let events = BroadcastTrigger::new(EVENT_CHANNEL_CAPACITY);
        let lifecycle = HookLifecycleManager::new(
            registry.clone(),
            receivers.clone(),
            credentials.clone(),
            config.server.workers,
        );
        let dispatcher = Dispatcher::new(receivers.clone(), Arc::new(events.clone()));
        let reporter = StatusReporter::new(registry.clone(), receivers.clone(), credentials);

        Ok(Self {
            config,
            receivers,
            registry,
            lifecycle,
            dispatcher,
            reporter,
            leader,
            events,
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }

    /// Store receivers declared in the config file that the store does not
    /// already hold. Returns how many were added.
    pub async fn seed_receivers(&self) -> Result<usize> {
        let mut added = 0;
        for declared in &self.config.receivers {
            let receiver = declared.to_receiver(&self.config.server.namespace)?;
            let reference = receiver.reference.clone();
            if self.receivers.insert(receiver).await? {
                info!(receiver = %reference, "seeded declared receiver");
                added += 1;
            }
        }
        Ok(added)
    }
}

pub type SharedState = Arc<AppState>;
