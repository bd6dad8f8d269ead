//! GitLab adapter (gitlab.com and self-hosted instances)

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::http::{ApiClient, MAX_PAGES, MAX_PER_PAGE, api_base, id_to_string};
use super::{HookRequest, RemoteApi, RemoteHook, RepoId, StatusUpdate};
use crate::ProviderConfig;
use crate::error::Result;
use crate::status::CommitState;

const DEFAULT_GITLAB_API: &str = "https://gitlab.com/api/v4";
const DEFAULT_GITLAB_HOST: &str = "gitlab.com";

#[derive(Debug, Clone)]
pub struct GitLabApi {
    client: ApiClient,
}

#[derive(Debug, Serialize)]
struct AddProjectHookOptions<'a> {
    url: &'a str,
    token: &'a str,
    push_events: bool,
    merge_requests_events: bool,
    tag_push_events: bool,
    enable_ssl_verification: bool,
}

#[derive(Debug, Serialize)]
struct SetCommitStatusOptions<'a> {
    state: &'static str,
    context: &'a str,
    target_url: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProjectHook {
    id: serde_json::Value,
    #[serde(default)]
    url: String,
}

fn gitlab_state(state: CommitState) -> &'static str {
    match state {
        CommitState::Pending => "pending",
        CommitState::Running => "running",
        CommitState::Success => "success",
        CommitState::Failure => "failed",
    }
}

impl GitLabApi {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base = api_base(config, DEFAULT_GITLAB_HOST, DEFAULT_GITLAB_API, "/api/v4");
        Ok(Self {
            client: ApiClient::new(&base)?,
        })
    }
}

#[async_trait]
impl RemoteApi for GitLabApi {
    async fn add_hook(
        &self,
        repo: &RepoId,
        hook: &HookRequest<'_>,
        access_token: &str,
    ) -> Result<Option<String>> {
        let project = repo.full_name();
        let url = self.client.url(&["projects", &project, "hooks"]);
        let opt = AddProjectHookOptions {
            url: hook.url,
            token: hook.secret,
            push_events: true,
            merge_requests_events: true,
            tag_push_events: true,
            enable_ssl_verification: false,
        };
        let created: serde_json::Value = self
            .client
            .execute_json(
                self.client
                    .request(Method::POST, url, access_token)
                    .query(&opt),
            )
            .await?;
        Ok(id_to_string(&created["id"]))
    }

    async fn list_hooks(&self, repo: &RepoId, access_token: &str) -> Result<Vec<RemoteHook>> {
        let project = repo.full_name();
        let mut hooks = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = self.client.url(&["projects", &project, "hooks"]);
            let batch: Vec<ProjectHook> = self
                .client
                .execute_json(
                    self.client
                        .request(Method::GET, url, access_token)
                        .query(&[("per_page", MAX_PER_PAGE), ("page", page)]),
                )
                .await?;
            let done = batch.len() < MAX_PER_PAGE;
            hooks.extend(batch.into_iter().filter_map(|h| {
                id_to_string(&h.id).map(|id| RemoteHook { id, url: h.url })
            }));
            if done {
                break;
            }
        }
        Ok(hooks)
    }

    async fn remove_hook(&self, repo: &RepoId, hook_id: &str, access_token: &str) -> Result<()> {
        let project = repo.full_name();
        let url = self.client.url(&["projects", &project, "hooks", hook_id]);
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
        let project = repo.full_name();
        let url = self.client.url(&["projects", &project, "statuses", commit]);
        let opt = SetCommitStatusOptions {
            state: gitlab_state(status.state),
            context: status.context,
            target_url: status.target_url,
            description: status.description,
        };
        self.client
            .execute(
                self.client
                    .request(Method::POST, url, access_token)
                    .query(&opt),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderKind, parse_repo_url};
    use crate::test_utils::FakeProvider;

    #[test]
    fn maps_failure_to_failed() {
        assert_eq!(gitlab_state(CommitState::Pending), "pending");
        assert_eq!(gitlab_state(CommitState::Running), "running");
        assert_eq!(gitlab_state(CommitState::Success), "success");
        assert_eq!(gitlab_state(CommitState::Failure), "failed");
    }

    #[test]
    fn self_hosted_base_url() {
        let api = GitLabApi::new(&ProviderConfig {
            kind: crate::provider::ProviderKind::GitLab,
            hostname: Some("gitlab.example.com".to_string()),
            tls: true,
            api_url: None,
        })
        .unwrap();
        assert_eq!(
            api.client.url(&["projects", "acme/widgets", "hooks"]).as_str(),
            "https://gitlab.example.com/api/v4/projects/acme%2Fwidgets/hooks"
        );
    }

    #[tokio::test]
    async fn listing_stops_after_short_page() {
        let fake = FakeProvider::start().await;
        for n in 0..MAX_PER_PAGE * 2 + 1 {
            fake.seed_hook(&format!("https://hooks.example.com/hooks/gitlab/ci:r{}", n));
        }
        let api = GitLabApi::new(&fake.config(ProviderKind::GitLab, "/api/v4")).unwrap();
        let repo = parse_repo_url("https://gitlab.example.com/acme/widgets.git").unwrap();

        let listed = api.list_hooks(&repo, "token").await.unwrap();
        assert_eq!(listed.len(), MAX_PER_PAGE * 2 + 1);
        let pages: Vec<_> = fake
            .requests()
            .iter()
            .map(|r| r.query["page"].clone())
            .collect();
        assert_eq!(pages, ["1", "2", "3"]);
        assert!(
            fake.requests()
                .iter()
                .all(|r| r.path == "/api/v4/projects/acme%2Fwidgets/hooks")
        );
    }
}
