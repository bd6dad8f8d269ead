//! In-process fake git host for adapter, lifecycle and reporter tests.
//!
//! Serves the hook and status endpoints of every adapter from one fallback
//! handler: it records each request, keeps a hook list, pages listings in
//! each provider's style, and can be told to fail or stall every call.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use reqwest::Url;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::ProviderConfig;
use crate::credentials::{CredentialConfig, StaticCredentials};
use crate::provider::{HookEndpoint, ProviderKind, ProviderRegistry};
use crate::receiver::{ReceiverSpec, WebhookReceiver};

pub const PUBLIC_URL: &str = "https://hooks.example.com";
pub const ACCESS_TOKEN: &str = "glpat-test";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Raw path as sent, percent-encoding intact
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: String,
    pub authorization: Option<String>,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    base: String,
    requests: Vec<RecordedRequest>,
    hooks: Vec<(u64, String)>,
    /// Listed, but already gone by the time they are deleted
    vanishing: Vec<(u64, String)>,
    next_id: u64,
    failure: Option<(u16, String)>,
    /// Server-side cap on page sizes, below whatever the client asks for
    page_size: Option<usize>,
    delay: Option<Duration>,
}

type Shared = Arc<Mutex<FakeState>>;

#[derive(Clone)]
pub struct FakeProvider {
    base: String,
    state: Shared,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{}", addr);
        state.lock().unwrap().base = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base, state }
    }

    /// Provider config pointing `kind` at this server under `api_path`.
    pub fn config(&self, kind: ProviderKind, api_path: &str) -> ProviderConfig {
        ProviderConfig {
            kind,
            hostname: None,
            tls: false,
            api_url: Some(format!("{}{}", self.base, api_path)),
        }
    }

    pub fn registry(&self, kind: ProviderKind, api_path: &str) -> Arc<ProviderRegistry> {
        Arc::new(
            ProviderRegistry::from_config(
                &[self.config(kind, api_path)],
                &HookEndpoint::new(PUBLIC_URL, "hooks"),
            )
            .unwrap(),
        )
    }

    /// Every subsequent request answers `status` with `body`.
    pub fn fail_with(&self, status: u16, body: &str) {
        self.state.lock().unwrap().failure = Some((status, body.to_string()));
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    /// Cap every listing page at `size` entries.
    pub fn page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = Some(size);
    }

    /// Hold every response for `delay` before answering.
    pub fn stall(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn hook_urls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.hooks.iter().map(|(_, url)| url.clone()).collect()
    }

    /// A hook created outside this process lifetime.
    pub fn seed_hook(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.hooks.push((id, url.to_string()));
    }

    /// A hook that shows up in listings but answers 404 when deleted, as if
    /// someone removed it in between.
    pub fn seed_vanishing_hook(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.vanishing.push((id, url.to_string()));
    }
}

pub fn credentials(name: &str) -> Arc<StaticCredentials> {
    let mut entries = HashMap::new();
    entries.insert(
        name.to_string(),
        CredentialConfig {
            token: Some(ACCESS_TOKEN.to_string()),
            token_env: None,
        },
    );
    Arc::new(StaticCredentials::new(entries))
}

pub fn receiver(reference: &str, kind: ProviderKind, repository_url: &str) -> WebhookReceiver {
    WebhookReceiver::with_token(
        reference.parse().unwrap(),
        ReceiverSpec {
            repository_url: repository_url.to_string(),
            provider: kind,
            credential: "acme".to_string(),
        },
        "abc123".to_string(),
    )
}

fn hook_id(segment: &str) -> Option<u64> {
    segment
        .trim_start_matches("%7B")
        .trim_end_matches("%7D")
        .parse()
        .ok()
}

fn is_hooks_collection(path: &str) -> bool {
    path.ends_with("/hooks") || path.ends_with("/webhooks")
}

fn query_usize(request: &RecordedRequest, key: &str) -> Option<usize> {
    request.query.get(key).and_then(|v| v.parse().ok())
}

/// Render one page of the hook listing the way the caller's provider would:
/// `limit`/`start` for Bitbucket Server, `pagelen`/`page` with a `next` link
/// for Bitbucket Cloud, and a bare array per `per_page`/`page` otherwise.
fn list_page(state: &FakeState, request: &RecordedRequest) -> Response {
    let hooks: Vec<Value> = state
        .hooks
        .iter()
        .chain(state.vanishing.iter())
        .map(|(id, url)| {
            json!({
                "id": id,
                "uuid": format!("{{{}}}", id),
                "url": url,
                "config": { "url": url },
            })
        })
        .collect();
    let cap = |requested: usize| requested.min(state.page_size.unwrap_or(usize::MAX)).max(1);
    let slice = |start: usize, len: usize| -> Vec<Value> {
        hooks.iter().skip(start).take(len).cloned().collect()
    };

    if let Some(limit) = query_usize(request, "limit") {
        let start = query_usize(request, "start").unwrap_or(0);
        let values = slice(start, cap(limit));
        let end = start + values.len();
        let last = end >= hooks.len();
        return Json(json!({
            "values": values,
            "isLastPage": last,
            "nextPageStart": if last { Value::Null } else { json!(end) },
        }))
        .into_response();
    }

    if let Some(pagelen) = query_usize(request, "pagelen") {
        let pagelen = cap(pagelen);
        let page = query_usize(request, "page").unwrap_or(1).max(1);
        let start = (page - 1) * pagelen;
        let values = slice(start, pagelen);
        let mut body = json!({ "values": values, "pagelen": pagelen });
        if start + pagelen < hooks.len() {
            body["next"] = json!(format!(
                "{}{}?pagelen={}&page={}",
                state.base,
                request.path,
                pagelen,
                page + 1
            ));
        }
        return Json(body).into_response();
    }

    let per_page = cap(query_usize(request, "per_page").unwrap_or(30));
    let page = query_usize(request, "page").unwrap_or(1).max(1);
    Json(Value::Array(slice((page - 1) * per_page, per_page))).into_response()
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delay = state.lock().unwrap().delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let query: HashMap<String, String> = Url::parse(&format!("http://fake{}", uri))
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default();
    let request = RecordedRequest {
        method: method.clone(),
        path: uri.path().to_string(),
        query,
        body: String::from_utf8_lossy(&body).into_owned(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    let mut state = state.lock().unwrap();
    state.requests.push(request.clone());
    if let Some((status, body)) = state.failure.clone() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, body).into_response();
    }

    let path = request.path.as_str();
    if path.contains("/statuses/") || path.contains("/build-status/") {
        return (StatusCode::CREATED, Json(json!({}))).into_response();
    }

    if is_hooks_collection(path) && method == Method::POST {
        let payload = request.json();
        let url = request
            .query
            .get("url")
            .cloned()
            .or_else(|| {
                payload
                    .pointer("/config/url")
                    .or_else(|| payload.get("url"))
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_default();
        state.next_id += 1;
        let id = state.next_id;
        state.hooks.push((id, url.clone()));
        return (
            StatusCode::CREATED,
            Json(json!({ "id": id, "uuid": format!("{{{}}}", id), "url": url })),
        )
            .into_response();
    }

    if is_hooks_collection(path) && method == Method::GET {
        return list_page(&state, &request);
    }

    if method == Method::DELETE {
        if let Some((collection, segment)) = path.rsplit_once('/') {
            if is_hooks_collection(collection) {
                let before = state.hooks.len();
                if let Some(id) = hook_id(segment) {
                    state.hooks.retain(|(hook, _)| *hook != id);
                    state.vanishing.retain(|(hook, _)| *hook != id);
                }
                return if state.hooks.len() < before {
                    StatusCode::NO_CONTENT.into_response()
                } else {
                    (StatusCode::NOT_FOUND, "hook not found").into_response()
                };
            }
        }
    }

    (StatusCode::NOT_FOUND, "no such endpoint").into_response()
}
