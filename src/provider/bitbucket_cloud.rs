//! Bitbucket Cloud adapter

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::bitbucket::BuildStatusBody;
use super::http::{ApiClient, MAX_PAGES, MAX_PER_PAGE, api_base};
use super::{HookRequest, RemoteApi, RemoteHook, RepoId, StatusUpdate};
use crate::ProviderConfig;
use crate::error::Result;

const DEFAULT_BITBUCKET_API: &str = "https://api.bitbucket.org/2.0";
const DEFAULT_BITBUCKET_HOST: &str = "bitbucket.org";
const HOOK_EVENTS: [&str; 3] = ["repo:push", "pullrequest:created", "pullrequest:updated"];
const HOOK_DESCRIPTION: &str = "git_webhook_sync";

#[derive(Debug, Clone)]
pub struct BitbucketCloudApi {
    client: ApiClient,
}

#[derive(Debug, Serialize)]
struct CreateHookBody<'a> {
    description: &'static str,
    url: &'a str,
    active: bool,
    secret: &'a str,
    events: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct HookPage {
    #[serde(default)]
    values: Vec<HookSubscription>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HookSubscription {
    uuid: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedHook {
    uuid: Option<String>,
}

impl BitbucketCloudApi {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base = api_base(config, DEFAULT_BITBUCKET_HOST, DEFAULT_BITBUCKET_API, "/2.0");
        Ok(Self {
            client: ApiClient::new(&base)?,
        })
    }

    /// Only follow `next` links that stay on the API origin the token was issued for.
    fn same_origin(&self, next: &Url) -> bool {
        next.origin() == self.client.base().origin()
    }
}

#[async_trait]
impl RemoteApi for BitbucketCloudApi {
    async fn add_hook(
        &self,
        repo: &RepoId,
        hook: &HookRequest<'_>,
        access_token: &str,
    ) -> Result<Option<String>> {
        let url = self
            .client
            .url(&["repositories", &repo.owner, &repo.name, "hooks"]);
        let body = CreateHookBody {
            description: HOOK_DESCRIPTION,
            url: hook.url,
            active: true,
            secret: hook.secret,
            events: HOOK_EVENTS,
        };
        let created: CreatedHook = self
            .client
            .execute_json(
                self.client
                    .request(Method::POST, url, access_token)
                    .json(&body),
            )
            .await?;
        Ok(created.uuid)
    }

    async fn list_hooks(&self, repo: &RepoId, access_token: &str) -> Result<Vec<RemoteHook>> {
        let mut hooks = Vec::new();
        let mut request = self
            .client
            .request(
                Method::GET,
                self.client
                    .url(&["repositories", &repo.owner, &repo.name, "hooks"]),
                access_token,
            )
            .query(&[("pagelen", MAX_PER_PAGE)]);

        for _ in 0..MAX_PAGES {
            let page: HookPage = self.client.execute_json(request).await?;
            hooks.extend(page.values.into_iter().map(|h| RemoteHook {
                id: h.uuid,
                url: h.url,
            }));
            let Some(next) = page.next else { break };
            let next = match Url::parse(&next) {
                Ok(url) if self.same_origin(&url) => url,
                _ => {
                    warn!("ignoring next page link {} for {}", next, repo.full_name());
                    break;
                }
            };
            request = self.client.request(Method::GET, next, access_token);
        }
        Ok(hooks)
    }

    async fn remove_hook(&self, repo: &RepoId, hook_id: &str, access_token: &str) -> Result<()> {
        let url = self
            .client
            .url(&["repositories", &repo.owner, &repo.name, "hooks", hook_id]);
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
        let url = self.client.url(&[
            "repositories",
            &repo.owner,
            &repo.name,
            "commit",
            commit,
            "statuses",
            "build",
        ]);
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
