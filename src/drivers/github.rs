//! GitHub REST v3 driver: a non-LLM service behind the same request/response shape.
//!
//! `metadata.action` selects the operation and `parameters` carries its arguments.
//! Results land in `plugin_data["<provider>_data"]`, always as a list.

use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{missing_api_key, DriverConfig, ProviderDriver};
use crate::error::{Error, ErrorContext};
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{PartialResponse, Request, Response, ServiceKind};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const LIST_QUERY_KEYS: &[&str] = &[
    "visibility",
    "affiliation",
    "type",
    "sort",
    "direction",
    "per_page",
    "page",
];

/// A routed GitHub operation with its required arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum GitHubAction {
    ListRepositories,
    GetRepository { repo: String },
    CreateIssue {
        repo: String,
        title: String,
        body: Option<String>,
    },
    SearchCode { query: String },
}

impl GitHubAction {
    pub fn name(&self) -> &'static str {
        match self {
            GitHubAction::ListRepositories => "list_repositories",
            GitHubAction::GetRepository { .. } => "get_repository",
            GitHubAction::CreateIssue { .. } => "create_issue",
            GitHubAction::SearchCode { .. } => "search_code",
        }
    }

    /// Route `metadata.action` and check the parameters it requires.
    pub fn from_request(provider: &str, request: &Request) -> Result<Self> {
        let action = request.metadata_str("action").unwrap_or("");
        let required = |key: &str| -> Result<String> {
            request
                .parameter_str(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::invalid_request_with_context(
                        format!("'{}' is required for {}", key, action),
                        ErrorContext::new()
                            .with_field_path(format!("parameters.{}", key))
                            .with_source("github_driver"),
                    )
                })
        };
        match action {
            "list_repositories" => Ok(GitHubAction::ListRepositories),
            "get_repository" => Ok(GitHubAction::GetRepository {
                repo: required("repo")?,
            }),
            "create_issue" => Ok(GitHubAction::CreateIssue {
                repo: required("repo")?,
                title: required("title")?,
                body: request.parameter_str("body").map(str::to_string),
            }),
            "search_code" => Ok(GitHubAction::SearchCode {
                query: required("query")?,
            }),
            other => Err(Error::UnsupportedAction {
                provider: provider.to_string(),
                action: other.to_string(),
            }),
        }
    }

    /// Canned data returned in test mode.
    fn fixture(&self) -> Vec<Value> {
        match self {
            GitHubAction::ListRepositories => vec![
                json!({"id": 1, "name": "example-repo", "full_name": "user/example-repo"}),
                json!({"id": 2, "name": "another-repo", "full_name": "user/another-repo"}),
            ],
            GitHubAction::GetRepository { repo } => vec![json!({
                "id": 1,
                "name": repo.rsplit('/').next().unwrap_or(repo),
                "full_name": repo,
                "description": "Example repository",
                "stargazers_count": 42,
                "forks_count": 13,
                "open_issues_count": 5,
            })],
            GitHubAction::CreateIssue { title, body, .. } => vec![json!({
                "id": 123,
                "number": 42,
                "title": title,
                "body": body,
                "state": "open",
            })],
            GitHubAction::SearchCode { .. } => vec![
                json!({"path": "file1.py", "repository": {"full_name": "user/repo1"}}),
                json!({"path": "file2.py", "repository": {"full_name": "user/repo2"}}),
            ],
        }
    }
}

#[derive(Debug)]
pub struct GitHubDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl GitHubDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = match (&config.api_key, config.is_mock()) {
            (Some(key), false) if !key.is_empty() => Some(
                HttpTransport::new(
                    config.base_url_or(DEFAULT_BASE_URL),
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                )?
                .with_header("Authorization", format!("token {}", key.expose()))
                .with_header("Accept", "application/vnd.github.v3+json")
                .with_header("User-Agent", concat!("omnixy/", env!("CARGO_PKG_VERSION"))),
            ),
            _ => None,
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    async fn fetch(&self, action: &GitHubAction, request: &Request) -> Result<Vec<Value>> {
        if self.config.is_mock() {
            debug!(provider = %self.provider_id, action = action.name(), "github fixture data");
            return Ok(action.fixture());
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| missing_api_key("GitHub"))?;
        info!(provider = %self.provider_id, action = action.name(), "github api call");

        let data = match action {
            GitHubAction::ListRepositories => {
                let query: Vec<(String, String)> = LIST_QUERY_KEYS
                    .iter()
                    .filter_map(|k| {
                        request.parameters().get(*k).map(|v| {
                            let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                            (k.to_string(), v)
                        })
                    })
                    .collect();
                let query: Vec<(&str, &str)> =
                    query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                transport.get_json("/user/repos", &query).await?
            }
            GitHubAction::GetRepository { repo } => {
                transport.get_json(&format!("/repos/{}", repo), &[]).await?
            }
            GitHubAction::CreateIssue { repo, title, body } => {
                transport
                    .post_json(
                        &format!("/repos/{}/issues", repo),
                        &json!({"title": title, "body": body}),
                    )
                    .await?
            }
            GitHubAction::SearchCode { query } => {
                transport.get_json("/search/code", &[("q", query.as_str())]).await?
            }
        };
        Ok(into_list(action, data))
    }
}

/// Normalize GitHub payloads to a list: search hits unwrap `items`, single entities are wrapped.
fn into_list(action: &GitHubAction, data: Value) -> Vec<Value> {
    match (action, data) {
        (GitHubAction::SearchCode { .. }, mut v) => match v.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        (_, Value::Array(items)) => items,
        (_, Value::Null) => Vec::new(),
        (_, other) => vec![other],
    }
}

#[async_trait]
impl ProviderDriver for GitHubDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn service_kind(&self) -> ServiceKind {
        ServiceKind::NonLlm
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        let action = GitHubAction::from_request(&self.provider_id, request)?;
        let data = self.fetch(&action, request).await?;
        let summary = serde_json::to_string(&data)?;

        Ok(Response::new(summary)?
            .with_model("github")
            .with_finish_reason("success")
            .with_metadata("provider", self.provider_id.as_str())
            .with_metadata("action", action.name())
            .with_metadata("timestamp", chrono::Utc::now().to_rfc3339())
            .with_plugin_data(format!("{}_data", self.provider_id), Value::Array(data)))
    }

    /// No native streaming: one call, one final fragment.
    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        let resp = self.send_request(request).await?;
        let mut part = PartialResponse::final_chunk(resp.text());
        part.metadata = resp.metadata().clone();
        part.plugin_data = resp.plugin_data().clone();
        Ok(Box::pin(stream::iter(vec![Ok(part)])))
    }
}
