//! gh-app-auth - Git credentials for GitHub Apps and stored tokens
//!
//! gh-app-auth acts as a git credential helper. For every repository URL git
//! asks about, it picks exactly one configured identity, then either hands
//! out a stored token or mints a short-lived installation token by signing
//! an App assertion and exchanging it with the host.
//!
//! The pieces, leaves first:
//! - [`storage`]: secret storage (OS keyring first, owner-only files second)
//! - [`assertion`]: RS256 App assertions
//! - [`router`]: URL pattern routing to a single identity
//! - [`cache`]: in-memory installation token cache
//! - [`host`]: installation discovery and token exchange over the host API
//! - [`auth`]: the authenticator tying the above together
//! - [`engine`]: the explicit object callers construct and drive
//!
//! [`config`] and [`protocol`] serve the binary: TOML configuration and the
//! git credential helper wire format.

pub mod assertion;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod host;
pub mod protocol;
pub mod router;
pub mod storage;

use router::UrlPattern;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

/// Username presented to git for installation tokens and for stored tokens
/// without an override
pub const DEFAULT_USERNAME: &str = "x-access-token";

/// Core error types for gh-app-auth
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Assertion error: {0}")]
    Assertion(#[from] assertion::AssertionError),

    #[error("Host error: {0}")]
    Host(#[from] host::HostError),

    #[error(transparent)]
    Auth(#[from] auth::AuthError),

    #[error("Credential protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    InvalidRequest(String),
}

/// A secret string that is redacted in `Debug` output and zeroized on drop
#[derive(Debug, Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Create a new secret from a string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose().as_bytes());
        hex::encode(&digest[..6])
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Secret {}

/// Where an App identity's private key lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// PEM file on disk; must not be readable by group or other
    File(PathBuf),
    /// Secret store entry under the identity name
    Store,
}

/// App-specific identity fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: u64,
    /// `None` until discovered from the target repository
    pub installation_id: Option<u64>,
    pub private_key: KeySource,
}

/// The kind of credential source an identity represents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKind {
    /// An installable App that exchanges signed assertions for tokens
    App(AppIdentity),
    /// A token kept in the secret store under the identity name
    StaticToken {
        /// Basic-auth username override
        username: Option<String>,
    },
}

impl IdentityKind {
    /// Short label used in listings and logs
    pub fn label(&self) -> &'static str {
        match self {
            IdentityKind::App(_) => "app",
            IdentityKind::StaticToken { .. } => "token",
        }
    }
}

/// A configured credential source with routing patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Unique name, also the secret store key
    pub name: String,
    pub kind: IdentityKind,
    /// URL patterns this identity serves (at least one)
    pub patterns: Vec<UrlPattern>,
    /// Tie-breaker between equally long matches; higher wins
    pub priority: i32,
}

impl Identity {
    /// Create an App identity
    pub fn app(name: impl Into<String>, app_id: u64, private_key: KeySource) -> Self {
        Self {
            name: name.into(),
            kind: IdentityKind::App(AppIdentity {
                app_id,
                installation_id: None,
                private_key,
            }),
            patterns: Vec::new(),
            priority: 0,
        }
    }

    /// Create a stored-token identity
    pub fn static_token(name: impl Into<String>, username: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdentityKind::StaticToken { username },
            patterns: Vec::new(),
            priority: 0,
        }
    }

    /// Add a URL pattern
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, router::PatternError> {
        self.patterns.push(UrlPattern::parse(pattern)?);
        Ok(self)
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Pin the installation id (App identities only)
    pub fn with_installation(mut self, installation_id: u64) -> Self {
        if let IdentityKind::App(app) = &mut self.kind {
            app.installation_id = Some(installation_id);
        }
        self
    }

    /// Check the identity invariants
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.name.trim().is_empty() {
            return Err(config::ConfigError::Invalid(
                "identity name must not be empty".to_string(),
            ));
        }
        // The name doubles as the secret store key
        if storage::validate_name(&self.name).is_err() {
            return Err(config::ConfigError::Invalid(format!(
                "identity name '{}' may only use letters, digits, '.', '-' and '_', and must not start with '.'",
                self.name
            )));
        }
        if self.patterns.is_empty() {
            return Err(config::ConfigError::Invalid(format!(
                "identity '{}' has no patterns",
                self.name
            )));
        }
        if let IdentityKind::App(app) = &self.kind {
            if app.app_id == 0 {
                return Err(config::ConfigError::Invalid(format!(
                    "identity '{}' must have a positive app_id",
                    self.name
                )));
            }
            if app.installation_id == Some(0) {
                return Err(config::ConfigError::Invalid(format!(
                    "identity '{}' has installation_id 0",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The App fields, if this is an App identity
    pub fn as_app(&self) -> Option<&AppIdentity> {
        match &self.kind {
            IdentityKind::App(app) => Some(app),
            IdentityKind::StaticToken { .. } => None,
        }
    }
}

impl AsRef<Identity> for Identity {
    fn as_ref(&self) -> &Identity {
        self
    }
}

/// What git receives for a resolved URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: Secret,
}
