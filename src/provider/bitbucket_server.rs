//! Bitbucket Server / Data Center adapter. Always self-hosted.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::bitbucket::BuildStatusBody;
use super::http::{ApiClient, MAX_PAGES, MAX_PER_PAGE, id_to_string};
use super::{HookRequest, RemoteApi, RemoteHook, RepoId, StatusUpdate};
use crate::ProviderConfig;
use crate::error::{HookError, Result};

const HOOK_EVENTS: [&str; 3] = ["repo:refs_changed", "pr:opened", "pr:from_ref_updated"];
const HOOK_NAME: &str = "git_webhook_sync";

#[derive(Debug, Clone)]
pub struct BitbucketServerApi {
    client: ApiClient,
}

#[derive(Debug, Serialize)]
struct CreateWebhookBody<'a> {
    name: &'static str,
    url: &'a str,
    active: bool,
    events: [&'static str; 3],
    configuration: WebhookConfiguration<'a>,
}

#[derive(Debug, Serialize)]
struct WebhookConfiguration<'a> {
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPage {
    #[serde(default)]
    values: Vec<Webhook>,
    #[serde(default = "default_last_page")]
    is_last_page: bool,
    next_page_start: Option<u64>,
}

fn default_last_page() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Webhook {
    id: serde_json::Value,
    #[serde(default)]
    url: String,
}

impl BitbucketServerApi {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base = match (config.api_url.as_deref(), config.hostname.as_deref()) {
            (Some(api_url), _) if !api_url.is_empty() => api_url.to_string(),
            (_, Some(host)) if !host.is_empty() => format!("{}://{}", config.scheme(), host),
            _ => {
                return Err(HookError::Configuration(
                    "bitbucketserver provider requires a hostname".to_string(),
                ));
            }
        };
        Ok(Self {
            client: ApiClient::new(&base)?,
        })
    }

    fn webhooks_path<'a>(repo: &'a RepoId) -> [&'a str; 8] {
        [
            "rest",
            "api",
            "1.0",
            "projects",
            &repo.owner,
            "repos",
            &repo.name,
            "webhooks",
        ]
    }
}

#[async_trait]
impl RemoteApi for BitbucketServerApi {
    async fn add_hook(
        &self,
        repo: &RepoId,
        hook: &HookRequest<'_>,
        access_token: &str,
    ) -> Result<Option<String>> {
        let url = self.client.url(&Self::webhooks_path(repo));
        let body = CreateWebhookBody {
            name: HOOK_NAME,
            url: hook.url,
            active: true,
            events: HOOK_EVENTS,
            configuration: WebhookConfiguration {
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
        let mut start = 0u64;
        for _ in 0..MAX_PAGES {
            let url = self.client.url(&Self::webhooks_path(repo));
            let page: WebhookPage = self
                .client
                .execute_json(
                    self.client
                        .request(Method::GET, url, access_token)
                        .query(&[("limit", MAX_PER_PAGE as u64), ("start", start)]),
                )
                .await?;
            hooks.extend(page.values.into_iter().filter_map(|h| {
                id_to_string(&h.id).map(|id| RemoteHook { id, url: h.url })
            }));
            match page.next_page_start {
                Some(next) if !page.is_last_page && next > start => start = next,
                _ => break,
            }
        }
        Ok(hooks)
    }

    async fn remove_hook(&self, repo: &RepoId, hook_id: &str, access_token: &str) -> Result<()> {
        let mut segments = Self::webhooks_path(repo).to_vec();
        segments.push(hook_id);
        let url = self.client.url(&segments);
        self.client
            .execute(self.client.request(Method::DELETE, url, access_token))
            .await?;
        Ok(())
    }

    async fn post_status(
        &self,
        _repo: &RepoId,
        commit: &str,
        status: &StatusUpdate<'_>,
        access_token: &str,
    ) -> Result<()> {
        let url = self
            .client
            .url(&["rest", "build-status", "1.0", "commits", commit]);
        let body = BuildStatusBody::new(status);
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
