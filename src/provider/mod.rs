//! Provider capability contract and the closed set of git host adapters.
//!
//! Every host is driven through [`HookProvider`]. [`Remote`] is the single
//! implementation: a tagged union over the adapters, chosen once from
//! configuration and shared read-only by all receivers of that host.
//! Adapters only know their host's REST shapes ([`RemoteApi`]); hook
//! matching, idempotent deletion and status mapping live here once.

mod bitbucket;
pub mod bitbucket_cloud;
pub mod bitbucket_server;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod repo_url;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ProviderConfig;
use crate::error::{HookError, Result};
use crate::execution::Execution;
use crate::receiver::{ReceiverRef, WebhookReceiver};
use crate::status::{CommitState, STATUS_CONTEXT, describe};

pub use bitbucket_cloud::BitbucketCloudApi;
pub use bitbucket_server::BitbucketServerApi;
pub use github::GitHubApi;
pub use gitlab::GitLabApi;
pub use http::require_token;
pub use repo_url::{RepoId, parse_repo_url};

/// Supported git hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
    BitbucketCloud,
    BitbucketServer,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::BitbucketCloud => "bitbucketcloud",
            ProviderKind::BitbucketServer => "bitbucketserver",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            "bitbucketcloud" => Ok(ProviderKind::BitbucketCloud),
            "bitbucketserver" => Ok(ProviderKind::BitbucketServer),
            other => Err(HookError::Parse(format!("unknown provider '{}'", other))),
        }
    }
}

/// Where providers deliver events: `<public_url>/<prefix>/<provider>/<reference>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEndpoint {
    public_url: String,
    prefix: String,
}

impl HookEndpoint {
    pub fn new(public_url: &str, prefix: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path marker identifying hooks this system created for one receiver.
    pub fn callback_suffix(&self, kind: ProviderKind, reference: &ReceiverRef) -> String {
        format!("/{}/{}/{}", self.prefix, kind, reference)
    }

    pub fn callback_url(&self, kind: ProviderKind, reference: &ReceiverRef) -> String {
        format!("{}{}", self.public_url, self.callback_suffix(kind, reference))
    }
}

/// The uniform operations every provider supports.
#[async_trait]
pub trait HookProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Register a hook pointing at this system's callback URL, carrying the
    /// receiver's secret token. Hooks already carrying the receiver's
    /// callback marker are removed first, so exactly one remains. Returns the
    /// remote hook id when the provider reports one.
    async fn create_hook(
        &self,
        receiver: &WebhookReceiver,
        access_token: &str,
    ) -> Result<Option<String>>;

    /// Remove every remote hook whose URL ends with this receiver's callback
    /// marker. Nothing to remove is not an error.
    async fn delete_hook(&self, receiver: &WebhookReceiver, access_token: &str) -> Result<()>;

    /// Post the status derived from the execution's handled condition.
    async fn update_status(&self, execution: &Execution, access_token: &str) -> Result<()>;
}

/// Hook creation request in provider-neutral form
#[derive(Debug, Clone)]
pub struct HookRequest<'a> {
    pub url: &'a str,
    pub secret: &'a str,
}

/// A hook as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHook {
    pub id: String,
    pub url: String,
}

/// Commit status in provider-neutral form
#[derive(Debug, Clone)]
pub struct StatusUpdate<'a> {
    pub state: CommitState,
    pub description: &'a str,
    pub target_url: &'a str,
    pub context: &'a str,
}

/// Host-specific REST calls behind the capability contract.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn add_hook(
        &self,
        repo: &RepoId,
        hook: &HookRequest<'_>,
        access_token: &str,
    ) -> Result<Option<String>>;

    async fn list_hooks(&self, repo: &RepoId, access_token: &str) -> Result<Vec<RemoteHook>>;

    async fn remove_hook(&self, repo: &RepoId, hook_id: &str, access_token: &str) -> Result<()>;

    async fn post_status(
        &self,
        repo: &RepoId,
        commit: &str,
        status: &StatusUpdate<'_>,
        access_token: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum Adapter {
    GitHub(GitHubApi),
    GitLab(GitLabApi),
    BitbucketCloud(BitbucketCloudApi),
    BitbucketServer(BitbucketServerApi),
}

impl Adapter {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(match config.kind {
            ProviderKind::GitHub => Adapter::GitHub(GitHubApi::new(config)?),
            ProviderKind::GitLab => Adapter::GitLab(GitLabApi::new(config)?),
            ProviderKind::BitbucketCloud => {
                Adapter::BitbucketCloud(BitbucketCloudApi::new(config)?)
            }
            ProviderKind::BitbucketServer => {
                Adapter::BitbucketServer(BitbucketServerApi::new(config)?)
            }
        })
    }

    fn kind(&self) -> ProviderKind {
        match self {
            Adapter::GitHub(_) => ProviderKind::GitHub,
            Adapter::GitLab(_) => ProviderKind::GitLab,
            Adapter::BitbucketCloud(_) => ProviderKind::BitbucketCloud,
            Adapter::BitbucketServer(_) => ProviderKind::BitbucketServer,
        }
    }

    fn api(&self) -> &dyn RemoteApi {
        match self {
            Adapter::GitHub(api) => api,
            Adapter::GitLab(api) => api,
            Adapter::BitbucketCloud(api) => api,
            Adapter::BitbucketServer(api) => api,
        }
    }
}

/// One configured git host
#[derive(Debug, Clone)]
pub struct Remote {
    endpoint: HookEndpoint,
    adapter: Adapter,
}

impl Remote {
    pub fn new(endpoint: HookEndpoint, adapter: Adapter) -> Self {
        Self { endpoint, adapter }
    }

    pub fn from_config(config: &ProviderConfig, endpoint: HookEndpoint) -> Result<Self> {
        Ok(Self::new(endpoint, Adapter::from_config(config)?))
    }

    /// Delete every listed hook whose URL ends with the receiver's callback
    /// marker. A hook that is already gone counts as removed.
    async fn remove_matching(
        &self,
        receiver: &WebhookReceiver,
        repo: &RepoId,
        token: &str,
    ) -> Result<usize> {
        let suffix = self
            .endpoint
            .callback_suffix(self.kind(), &receiver.reference);
        let api = self.adapter.api();

        let hooks = api.list_hooks(repo, token).await?;
        let mut removed = 0;
        for hook in hooks.iter().filter(|h| h.url.ends_with(&suffix)) {
            match api.remove_hook(repo, &hook.id, token).await {
                Ok(()) => info!(
                    receiver = %receiver.reference,
                    provider = %self.kind(),
                    "deleted hook {} on {}", hook.id, repo.full_name()
                ),
                Err(HookError::ProviderApi { status: 404, .. }) => warn!(
                    receiver = %receiver.reference,
                    "hook {} on {} was already gone", hook.id, repo.full_name()
                ),
                Err(e) => return Err(e),
            }
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl HookProvider for Remote {
    fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    async fn create_hook(
        &self,
        receiver: &WebhookReceiver,
        access_token: &str,
    ) -> Result<Option<String>> {
        let token = require_token(access_token)?;
        let repo = parse_repo_url(&receiver.spec.repository_url)?;
        // Hooks left by an earlier incarnation carry a secret we no longer hold
        let stale = self.remove_matching(receiver, &repo, token).await?;
        if stale > 0 {
            warn!(
                receiver = %receiver.reference,
                "replaced {} stale hook(s) on {}", stale, repo.full_name()
            );
        }
        let url = self.endpoint.callback_url(self.kind(), &receiver.reference);
        let request = HookRequest {
            url: &url,
            secret: &receiver.status.token,
        };
        let hook_id = self.adapter.api().add_hook(&repo, &request, token).await?;
        info!(
            receiver = %receiver.reference,
            provider = %self.kind(),
            "created hook {:?} on {} -> {}",
            hook_id,
            repo.full_name(),
            url
        );
        Ok(hook_id)
    }

    async fn delete_hook(&self, receiver: &WebhookReceiver, access_token: &str) -> Result<()> {
        let token = require_token(access_token)?;
        let repo = parse_repo_url(&receiver.spec.repository_url)?;
        if self.remove_matching(receiver, &repo, token).await? == 0 {
            debug!(
                receiver = %receiver.reference,
                "no hook for this receiver on {}", repo.full_name()
            );
        }
        Ok(())
    }

    async fn update_status(&self, execution: &Execution, access_token: &str) -> Result<()> {
        let token = require_token(access_token)?;
        let repo = parse_repo_url(&execution.repository_url)?;
        let (state, description) = describe(execution.handled());
        let status = StatusUpdate {
            state,
            description,
            target_url: &execution.status_url,
            context: STATUS_CONTEXT,
        };
        self.adapter
            .api()
            .post_status(&repo, &execution.commit, &status, token)
            .await
    }
}

/// Adapters resolved from configuration, at most one per provider kind
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    remotes: HashMap<ProviderKind, Arc<Remote>>,
}

impl ProviderRegistry {
    pub fn from_config(configs: &[ProviderConfig], endpoint: &HookEndpoint) -> Result<Self> {
        let mut remotes = HashMap::new();
        for config in configs {
            let remote = Remote::from_config(config, endpoint.clone())?;
            if remotes.insert(config.kind, Arc::new(remote)).is_some() {
                return Err(HookError::Configuration(format!(
                    "provider '{}' configured more than once",
                    config.kind
                )));
            }
        }
        Ok(Self { remotes })
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<Remote>> {
        self.remotes.get(&kind).cloned().ok_or_else(|| {
            HookError::Configuration(format!("no configuration for provider '{}'", kind))
        })
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.remotes.keys().copied().collect()
    }
}
