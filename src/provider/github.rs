//! GitHub adapter (github.com and GitHub Enterprise)

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::http::{ApiClient, MAX_PAGES, MAX_PER_PAGE, api_base, id_to_string};
use super::{HookRequest, RemoteApi, RemoteHook, RepoId, StatusUpdate};
use crate::ProviderConfig;
use crate::error::Result;
use crate::status::CommitState;

const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_GITHUB_HOST: &str = "github.com";
const HOOK_EVENTS: [&str; 2] = ["push", "pull_request"];

#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: ApiClient,
}

#[derive(Debug, Serialize)]
struct CreateHookBody<'a> {
    name: &'static str,
    active: bool,
    events: [&'static str; 2],
    config: HookConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    content_type: &'static str,
    insecure_ssl: &'static str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct RepoHook {
    id: serde_json::Value,
    #[serde(default)]
    config: RepoHookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RepoHookConfig {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateStatusBody<'a> {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
    description: &'a str,
    context: &'a str,
}

/// GitHub has no running state; in-progress builds stay `pending`.
fn github_state(state: CommitState) -> &'static str {
    match state {
        CommitState::Pending | CommitState::Running => "pending",
        CommitState::Success => "success",
        CommitState::Failure => "failure",
    }
}

impl GitHubApi {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base = api_base(config, DEFAULT_GITHUB_HOST, DEFAULT_GITHUB_API, "/api/v3");
        Ok(Self {
            client: ApiClient::new(&base)?,
        })
    }
}

#[async_trait]
impl RemoteApi for GitHubApi {
    async fn add_hook(
        &self,
        repo: &RepoId,
        hook: &HookRequest<'_>,
        access_token: &str,
    ) -> Result<Option<String>> {
        let url = self.client.url(&["repos", &repo.owner, &repo.name, "hooks"]);
        let body = CreateHookBody {
            name: "web",
            active: true,
            events: HOOK_EVENTS,
            config: HookConfig {
                url: hook.url,
                content_type: "json",
                insecure_ssl: "1",
                secret: hook.secret,
            },
        };
        let created: serde_json::Value = self
            .client
            .execute_json(
                self.client
                    .request(Method::POST, url, access_token)
                    .json(&body),
            )
            .await?;
        Ok(id_to_string(&created["id"]))
    }

    async fn list_hooks(&self, repo: &RepoId, access_token: &str) -> Result<Vec<RemoteHook>> {
        let mut hooks = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = self.client.url(&["repos", &repo.owner, &repo.name, "hooks"]);
            let batch: Vec<RepoHook> = self
                .client
                .execute_json(
                    self.client
                        .request(Method::GET, url, access_token)
                        .query(&[("per_page", MAX_PER_PAGE), ("page", page)]),
                )
                .await?;
            let done = batch.len() < MAX_PER_PAGE;
            hooks.extend(batch.into_iter().filter_map(|h| {
                let id = id_to_string(&h.id)?;
                Some(RemoteHook {
                    id,
                    url: h.config.url.unwrap_or_default(),
                })
            }));
            if done {
                break;
            }
        }
        Ok(hooks)
    }

    async fn remove_hook(&self, repo: &RepoId, hook_id: &str, access_token: &str) -> Result<()> {
        let url = self
            .client
            .url(&["repos", &repo.owner, &repo.name, "hooks", hook_id]);
        self.client
            .execute(self.client.request(Method::DELETE, url, access_token))
            .await?;
        Ok(())
    }

    async fn post_status(
        &self,
        repo: &RepoId,
        commit: &str,
        status: &StatusUpdate<'_>,
        access_token: &str,
    ) -> Result<()> {
        let url = self
            .client
            .url(&["repos", &repo.owner, &repo.name, "statuses", commit]);
        let body = CreateStatusBody {
            state: github_state(status.state),
            target_url: Some(status.target_url).filter(|u| !u.is_empty()),
            description: status.description,
            context: status.context,
        };
        self.client
            .execute(
                self.client
                    .request(Method::POST, url, access_token)
                    .json(&body),
            )
            .await?;
        Ok(())
    }
}
