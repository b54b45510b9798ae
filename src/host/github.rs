//! GitHub REST implementation of [`HostApi`]

use super::{HostApi, HostError, InstallationToken};
use crate::Secret;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const GITHUB_API: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github+json";

/// Host client settings
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Fixed API base, overriding the per-host default
    pub api_url: Option<Url>,
    /// Per-request timeout; `None` leaves it to the caller's deadline
    pub request_timeout: Option<Duration>,
}

/// API base URL for a git host: `api.github.com` for github.com,
/// `https://<host>/api/v3` for GitHub Enterprise Server
pub fn api_base_for_host(host: &str) -> Result<Url, HostError> {
    let raw = match host {
        "github.com" | "www.github.com" => GITHUB_API.to_string(),
        other => format!("https://{}/api/v3", other),
    };
    Url::parse(&raw).map_err(|e| HostError::InvalidUrl(format!("{}: {}", raw, e)))
}

#[derive(Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

/// GitHub API client
pub struct GitHubClient {
    client: Client,
    api_url: Option<Url>,
}

impl GitHubClient {
    /// Create a client
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        let mut builder =
            Client::builder().user_agent(concat!("gh-app-auth/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            api_url: config.api_url.clone(),
        })
    }

    fn endpoint(&self, host: &str, segments: &[&str]) -> Result<Url, HostError> {
        let mut url = match &self.api_url {
            Some(url) => url.clone(),
            None => api_base_for_host(host)?,
        };
        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|_| HostError::InvalidUrl(format!("{} cannot be a base", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_installation(&self, url: Url, assertion: &Secret) -> Result<u64, HostError> {
        debug!(%url, "looking up installation");
        let response = self
            .client
            .get(url)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(assertion.expose())
            .send()
            .await?;
        let body: InstallationResponse = check(response).await?.json().await?;
        Ok(body.id)
    }
}

/// Turn non-2xx responses into errors carrying the host's message
async fn check(response: Response) -> Result<Response, HostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or_else(|_| text.chars().take(200).collect());

    if status == StatusCode::NOT_FOUND {
        Err(HostError::NotFound(message))
    } else {
        Err(HostError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl HostApi for GitHubClient {
    async fn discover_installation(
        &self,
        host: &str,
        assertion: &Secret,
        owner: &str,
        repo: Option<&str>,
    ) -> Result<u64, HostError> {
        if let Some(repo) = repo {
            let url = self.endpoint(host, &["repos", owner, repo, "installation"])?;
            return self.get_installation(url, assertion).await.map_err(|e| match e {
                HostError::NotFound(_) => {
                    HostError::NotFound(format!("no installation for {}/{}", owner, repo))
                }
                other => other,
            });
        }

        // Without a repository, the owner may be an organization or a user
        let url = self.endpoint(host, &["orgs", owner, "installation"])?;
        match self.get_installation(url, assertion).await {
            Err(HostError::NotFound(_)) => {
                let url = self.endpoint(host, &["users", owner, "installation"])?;
                self.get_installation(url, assertion).await.map_err(|e| match e {
                    HostError::NotFound(_) => {
                        HostError::NotFound(format!("no installation for {}", owner))
                    }
                    other => other,
                })
            }
            result => result,
        }
    }

    async fn create_installation_token(
        &self,
        host: &str,
        assertion: &Secret,
        installation_id: u64,
    ) -> Result<InstallationToken, HostError> {
        let id = installation_id.to_string();
        let url = self.endpoint(host, &["app", "installations", &id, "access_tokens"])?;
        debug!(%url, "requesting installation token");

        let response = self
            .client
            .post(url)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(assertion.expose())
            .send()
            .await?;
        let body: AccessTokenResponse = check(response).await?.json().await?;

        if body.token.is_empty() {
            return Err(HostError::InvalidResponse("empty token".to_string()));
        }
        Ok(InstallationToken {
            token: Secret::new(body.token),
            expires_at: body.expires_at,
        })
    }
}
