//! Host API used by the authenticator
//!
//! Two request/response calls: discover the installation of an App for an
//! account or repository, and exchange an App assertion for an installation
//! access token. [`GitHubClient`] implements them over the GitHub REST API.

mod github;

pub use github::{api_base_for_host, GitHubClient, HostConfig};

use crate::Secret;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Host API errors
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Host returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid host response: {0}")]
    InvalidResponse(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

/// An installation access token as issued by the host
#[derive(Debug, Clone)]
pub struct InstallationToken {
    pub token: Secret,
    /// Host-declared expiry
    pub expires_at: DateTime<Utc>,
}

/// The host calls the authenticator needs
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Find the App installation covering `owner` (and `repo`, when given)
    async fn discover_installation(
        &self,
        host: &str,
        assertion: &Secret,
        owner: &str,
        repo: Option<&str>,
    ) -> Result<u64, HostError>;

    /// Exchange an App assertion for an installation access token
    async fn create_installation_token(
        &self,
        host: &str,
        assertion: &Secret,
        installation_id: u64,
    ) -> Result<InstallationToken, HostError>;
}
