//! Shared outbound REST plumbing for provider adapters

use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::ProviderConfig;
use crate::error::{HookError, Result};

/// Largest page size every supported provider accepts
pub const MAX_PER_PAGE: usize = 100;
/// Upper bound on pages followed when listing hooks
pub const MAX_PAGES: usize = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("git_webhook_sync/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over a `reqwest::Client` rooted at one provider API base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: &str) -> Result<Self> {
        Self::with_timeout(base, REQUEST_TIMEOUT)
    }

    /// Client whose every request is abandoned after `timeout`.
    pub fn with_timeout(base: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| {
            HookError::Configuration(format!("invalid provider API url '{}': {}", base, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(HookError::Configuration(format!(
                "provider API url '{}' cannot be a base",
                base
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HookError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Append path segments to the base URL, percent-encoding each one
    /// (so `acme/widgets` becomes `acme%2Fwidgets`).
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Start a request with bearer auth and JSON accept headers.
    pub fn request(&self, method: Method, url: Url, access_token: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send the request; any non-2xx response becomes a `ProviderApi` error
    /// carrying the status and body.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HookError::ProviderApi {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    pub async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HookError::Parse(format!("unexpected provider response: {}", e)))
    }
}

/// Resolve an adapter's API base: an explicit `api_url` wins, then a
/// self-hosted `hostname`, then the public SaaS endpoint.
pub fn api_base(
    config: &ProviderConfig,
    default_host: &str,
    default_api: &str,
    api_path: &str,
) -> String {
    if let Some(api_url) = config.api_url.as_deref().filter(|u| !u.is_empty()) {
        return api_url.to_string();
    }
    match config.hostname.as_deref() {
        Some(host) if !host.is_empty() && host != default_host => {
            format!("{}://{}{}", config.scheme(), host, api_path)
        }
        _ => default_api.to_string(),
    }
}

/// Fail fast when a credential resolved to nothing.
pub fn require_token(access_token: &str) -> Result<&str> {
    if access_token.trim().is_empty() {
        return Err(HookError::Configuration(
            "empty access token for provider".to_string(),
        ));
    }
    Ok(access_token)
}

/// Hook ids come back as numbers from some providers and strings from others.
pub fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeProvider;
    use serde_json::json;

    #[test]
    fn url_encodes_each_segment() {
        let client = ApiClient::new("https://gitlab.example.com/api/v4").unwrap();
        let url = client.url(&["projects", "acme/widgets", "hooks"]);
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/api/v4/projects/acme%2Fwidgets/hooks"
        );
    }

    #[test]
    fn url_tolerates_trailing_slash_on_base() {
        let client = ApiClient::new("https://api.github.com/").unwrap();
        let url = client.url(&["repos", "octo", "hello", "hooks"]);
        assert_eq!(url.as_str(), "https://api.github.com/repos/octo/hello/hooks");
    }

    #[test]
    fn invalid_base_is_configuration_error() {
        let err = ApiClient::new("not a url").unwrap_err();
        assert!(matches!(err, HookError::Configuration(_)));
        let err = ApiClient::new("mailto:ops@example.com").unwrap_err();
        assert!(matches!(err, HookError::Configuration(_)));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            require_token("  "),
            Err(HookError::Configuration(_))
        ));
        assert_eq!(require_token("abc").unwrap(), "abc");
    }

    fn config(hostname: Option<&str>, tls: bool) -> ProviderConfig {
        ProviderConfig {
            kind: crate::provider::ProviderKind::GitLab,
            hostname: hostname.map(str::to_string),
            tls,
            api_url: None,
        }
    }

    #[test]
    fn api_base_prefers_public_endpoint_for_default_host() {
        let base = api_base(
            &config(Some("gitlab.com"), false),
            "gitlab.com",
            "https://gitlab.com/api/v4",
            "/api/v4",
        );
        assert_eq!(base, "https://gitlab.com/api/v4");
        let base = api_base(&config(None, true), "gitlab.com", "https://gitlab.com/api/v4", "/api/v4");
        assert_eq!(base, "https://gitlab.com/api/v4");
    }

    #[test]
    fn api_base_uses_self_hosted_scheme() {
        let base = api_base(
            &config(Some("git.internal"), false),
            "gitlab.com",
            "https://gitlab.com/api/v4",
            "/api/v4",
        );
        assert_eq!(base, "http://git.internal/api/v4");
    }

    #[test]
    fn api_base_explicit_url_wins() {
        let mut cfg = config(Some("git.internal"), true);
        cfg.api_url = Some("http://127.0.0.1:8080/api/v4".to_string());
        let base = api_base(&cfg, "gitlab.com", "https://gitlab.com/api/v4", "/api/v4");
        assert_eq!(base, "http://127.0.0.1:8080/api/v4");
    }

    #[test]
    fn ids_from_numbers_and_strings() {
        assert_eq!(id_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(id_to_string(&json!("{uuid}")), Some("{uuid}".to_string()));
        assert_eq!(id_to_string(&json!("")), None);
        assert_eq!(id_to_string(&json!(null)), None);
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_transient() {
        let fake = FakeProvider::start().await;
        fake.stall(Duration::from_millis(500));
        let client = ApiClient::with_timeout(fake.base(), Duration::from_millis(50)).unwrap();

        let url = client.url(&["repos", "acme", "widgets", "hooks"]);
        let err = client
            .execute(client.request(Method::GET, url, "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Timeout(_)), "got {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn non_success_carries_status_and_body() {
        let fake = FakeProvider::start().await;
        fake.fail_with(422, "validation failed");
        let client = ApiClient::new(fake.base()).unwrap();

        let url = client.url(&["repos", "acme", "widgets", "hooks"]);
        let err = client
            .execute(client.request(Method::GET, url, "token"))
            .await
            .unwrap_err();
        match err {
            HookError::ProviderApi { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "validation failed");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
        let sent = &fake.requests()[0];
        assert_eq!(sent.authorization.as_deref(), Some("Bearer token"));
    }
}
