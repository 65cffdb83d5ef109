//! Production `GitHubApi` implementation over `reqwest`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::api::{CodeSearchItem, GitHubApi, RateLimits, RemoteBranch, RemoteRepository, RemoteUser};
use super::GitHubError;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_RAW: &str = "application/vnd.github.raw+json";

/// Authenticated GitHub REST client.
///
/// Authentication is a single bearer credential plus a product identifier
/// string sent as `User-Agent`.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, product: &str) -> Result<Self, GitHubError> {
        Self::with_base_url(token, product, DEFAULT_BASE_URL)
    }

    /// Point the client at a different API root. Integration tests use this
    /// to talk to a local stub server.
    pub fn with_base_url(
        token: impl Into<String>,
        product: &str,
        base_url: impl Into<String>,
    ) -> Result<Self, GitHubError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(product).unwrap_or_else(|_| HeaderValue::from_static("repowarden")),
        );
        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn auth_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Issue a GET and map the status: 401/403 are the recoverable
    /// authorization failures, 404 is reported separately so `raw_content`
    /// can treat it as a normal absence, anything else non-2xx is an
    /// unexpected API error.
    async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        accept: &'static str,
    ) -> Result<Option<reqwest::Response>, GitHubError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_value())
            .header(ACCEPT, accept)
            .query(query)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response)),
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let message = response.text().await.unwrap_or_default();
                Err(GitHubError::Unauthorized(message))
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(GitHubError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Like `get` but where 404 is also unexpected.
    async fn get_required(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, GitHubError> {
        match self.get(path, query, GITHUB_JSON).await? {
            Some(response) => Ok(response),
            None => Err(GitHubError::Api {
                status: 404,
                message: format!("{path} not found"),
            }),
        }
    }
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimits,
}

#[derive(Deserialize)]
struct SearchResponse<T> {
    items: Vec<T>,
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn user(&self, login: &str) -> Result<RemoteUser, GitHubError> {
        let response = self.get_required(&format!("/users/{login}"), &[]).await?;
        Ok(response.json().await?)
    }

    async fn rate_limits(&self) -> Result<RateLimits, GitHubError> {
        let response = self.get_required("/rate_limit", &[]).await?;
        let body: RateLimitResponse = response.json().await?;
        Ok(body.resources)
    }

    async fn search_repositories(
        &self,
        owner: &str,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRepository>, GitHubError> {
        let q = match updated_after {
            Some(t) => format!(
                "user:{owner} updated:>{}",
                t.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            None => format!("user:{owner}"),
        };
        debug!(query = %q, "searching repositories");
        let response = self
            .get_required("/search/repositories", &[("q", q.as_str()), ("per_page", "100")])
            .await?;
        let body: SearchResponse<RemoteRepository> = response.json().await?;
        Ok(body.items)
    }

    async fn search_code(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        filename: &str,
    ) -> Result<Vec<CodeSearchItem>, GitHubError> {
        let q = format!("repo:{owner}/{repo} path:{path} filename:{filename}");
        debug!(query = %q, "searching code");
        let response = self
            .get_required("/search/code", &[("q", q.as_str()), ("per_page", "100")])
            .await?;
        let body: SearchResponse<CodeSearchItem> = response.json().await?;
        Ok(body.items)
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<RemoteBranch>, GitHubError> {
        let response = self
            .get_required(&format!("/repos/{owner}/{repo}/branches"), &[("per_page", "100")])
            .await?;
        Ok(response.json().await?)
    }

    async fn raw_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, GitHubError> {
        let trimmed = path.trim_start_matches('/');
        let response = self
            .get(&format!("/repos/{owner}/{repo}/contents/{trimmed}"), &[], GITHUB_RAW)
            .await?;

        match response {
            Some(response) => Ok(Some(response.bytes().await?.to_vec())),
            None => {
                debug!(%owner, %repo, path = %trimmed, "raw content not found");
                Ok(None)
            }
        }
    }
}
