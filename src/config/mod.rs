//! Configuration for gh-app-auth
//!
//! Loaded from a TOML file. Identities come from `[[apps]]` and `[[tokens]]`
//! tables; everything else has defaults.

mod types;

pub use types::*;

use crate::host::HostConfig;
use crate::router::PatternError;
use crate::storage::DEFAULT_SERVICE;
use crate::Identity;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "GH_APP_AUTH_CONFIG";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid pattern for identity '{identity}': {source}")]
    Pattern {
        identity: String,
        #[source]
        source: PatternError,
    },
}

/// Main gh-app-auth configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub host: HostConfig,
    /// Apps first, then tokens, in file order
    pub identities: Vec<Identity>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let logging = raw.logging.unwrap_or_default().into();
        let storage = raw.storage.unwrap_or_default().try_into()?;
        let cache = raw.cache.unwrap_or_default().try_into()?;
        let host = raw.host.unwrap_or_default().try_into()?;

        let apps = raw.apps.into_iter().map(Identity::try_from);
        let tokens = raw.tokens.into_iter().map(Identity::try_from);
        let identities = apps.chain(tokens).collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for identity in &identities {
            if !seen.insert(identity.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate identity name '{}'",
                    identity.name
                )));
            }
        }

        Ok(Self {
            logging,
            storage,
            cache,
            host,
            identities,
        })
    }

    /// Create a default configuration with no identities
    pub fn default_config() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            host: HostConfig::default(),
            identities: vec![],
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gh-app-auth")
            .join("config.toml")
    }

    /// Get the default directory for file-backed secrets
    pub fn default_secrets_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gh-app-auth")
            .join("secrets")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Secret storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// OS keyring service name
    pub keyring_service: String,
    /// Directory for the file backend
    pub dir: PathBuf,
    /// Bound on every backend call
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keyring_service: DEFAULT_SERVICE.to_string(),
            dir: Config::default_secrets_dir(),
            timeout: crate::storage::DEFAULT_TIMEOUT,
        }
    }
}

/// Token cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: crate::cache::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Expand a leading `~/` to the home directory
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityKind, KeySource};

    const FULL: &str = r#"
        [logging]
        level = "debug"

        [storage]
        keyring_service = "test-service"
        dir = "/var/lib/gh-app-auth"
        timeout_secs = 5

        [cache]
        sweep_interval_secs = 30

        [host]
        api_url = "https://ghe.example.com/api/v3"
        request_timeout_secs = 10

        [[apps]]
        name = "deploy-bot"
        app_id = 12345
        installation_id = 678
        private_key_path = "/etc/keys/deploy.pem"
        patterns = ["github.com/acme/*"]
        priority = 10

        [[apps]]
        name = "release-bot"
        app_id = 999
        private_key_source = "store"
        patterns = ["github.com/acme/releases"]

        [[tokens]]
        name = "ci-pat"
        username = "ci-user"
        patterns = ["github.com/acme/legacy", "ghe.example.com/*"]
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.keyring_service, "test-service");
        assert_eq!(config.storage.dir, PathBuf::from("/var/lib/gh-app-auth"));
        assert_eq!(config.storage.timeout, Duration::from_secs(5));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(30));
        assert_eq!(
            config.host.api_url.as_ref().map(|u| u.as_str()),
            Some("https://ghe.example.com/api/v3")
        );
        assert_eq!(config.host.request_timeout, Some(Duration::from_secs(10)));

        assert_eq!(config.identities.len(), 3);
        let deploy = &config.identities[0];
        assert_eq!(deploy.name, "deploy-bot");
        assert_eq!(deploy.priority, 10);
        let app = deploy.as_app().unwrap();
        assert_eq!(app.app_id, 12345);
        assert_eq!(app.installation_id, Some(678));
        assert_eq!(
            app.private_key,
            KeySource::File(PathBuf::from("/etc/keys/deploy.pem"))
        );

        let release = config.identities[1].as_app().unwrap();
        assert_eq!(release.private_key, KeySource::Store);
        assert_eq!(release.installation_id, None);

        let pat = &config.identities[2];
        assert_eq!(
            pat.kind,
            IdentityKind::StaticToken {
                username: Some("ci-user".to_string())
            }
        );
        assert_eq!(pat.patterns.len(), 2);
        assert_eq!(pat.priority, 0);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.storage.keyring_service, DEFAULT_SERVICE);
        assert_eq!(config.storage.timeout, Duration::from_secs(3));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(60));
        assert!(config.host.api_url.is_none());
        assert!(config.identities.is_empty());
    }

    #[test]
    fn test_home_expansion() {
        let config = Config::parse(
            r#"
            [[apps]]
            name = "bot"
            app_id = 1
            private_key_path = "~/.keys/bot.pem"
            patterns = ["github.com/*"]
            "#,
        )
        .unwrap();
        match &config.identities[0].as_app().unwrap().private_key {
            KeySource::File(path) => {
                assert!(path.ends_with(".keys/bot.pem"));
                assert!(!path.starts_with("~"));
            }
            other => panic!("unexpected key source: {other:?}"),
        }
    }

    fn invalid(toml: &str) -> ConfigError {
        Config::parse(toml).unwrap_err()
    }

    #[test]
    fn test_rejects_duplicate_names_across_kinds() {
        let err = invalid(
            r#"
            [[apps]]
            name = "shared"
            app_id = 1
            private_key_source = "store"
            patterns = ["github.com/*"]

            [[tokens]]
            name = "shared"
            patterns = ["github.com/acme/*"]
            "#,
        );
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_rejects_zero_app_id() {
        let err = invalid(
            r#"
            [[apps]]
            name = "bot"
            app_id = 0
            private_key_source = "store"
            patterns = ["github.com/*"]
            "#,
        );
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_missing_patterns() {
        let err = invalid(
            r#"
            [[tokens]]
            name = "pat"
            "#,
        );
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("no patterns")));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let err = invalid(
            r#"
            [[tokens]]
            name = "pat"
            patterns = ["github.com/*/widgets"]
            "#,
        );
        assert!(matches!(err, ConfigError::Pattern { identity, .. } if identity == "pat"));

        let err = invalid(
            r#"
            [[tokens]]
            name = "pat"
            patterns = [""]
            "#,
        );
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn test_key_source_must_be_exactly_one() {
        let both = invalid(
            r#"
            [[apps]]
            name = "bot"
            app_id = 1
            private_key_path = "/k.pem"
            private_key_source = "store"
            patterns = ["github.com/*"]
            "#,
        );
        assert!(matches!(both, ConfigError::Invalid(msg) if msg.contains("both")));

        let neither = invalid(
            r#"
            [[apps]]
            name = "bot"
            app_id = 1
            patterns = ["github.com/*"]
            "#,
        );
        assert!(matches!(neither, ConfigError::Invalid(_)));

        let unknown = invalid(
            r#"
            [[apps]]
            name = "bot"
            app_id = 1
            private_key_source = "vault"
            patterns = ["github.com/*"]
            "#,
        );
        assert!(matches!(unknown, ConfigError::Invalid(msg) if msg.contains("vault")));
    }

    #[test]
    fn test_rejects_names_unusable_as_secret_keys() {
        let spaced = invalid(
            r#"
            [[tokens]]
            name = "ci pat"
            patterns = ["github.com/acme/*"]
            "#,
        );
        assert!(matches!(spaced, ConfigError::Invalid(msg) if msg.contains("ci pat")));

        let dotted = invalid(
            r#"
            [[apps]]
            name = ".bot"
            app_id = 1
            private_key_source = "store"
            patterns = ["github.com/*"]
            "#,
        );
        assert!(matches!(dotted, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        assert!(matches!(
            invalid("[cache]\nsweep_interval_secs = 0"),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            invalid("[storage]\ntimeout_secs = 0"),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_rejects_bad_api_url() {
        assert!(matches!(
            invalid("[host]\napi_url = \"not a url\""),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(invalid("[[apps]\n"), ConfigError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, FULL).unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.identities.len(), 3);
    }
}
