//! Raw configuration types for TOML parsing

use super::*;
use crate::router::UrlPattern;
use crate::KeySource;
use serde::Deserialize;
use url::Url;

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize, Default)]
pub struct RawConfig {
    pub logging: Option<RawLoggingConfig>,
    pub storage: Option<RawStorageConfig>,
    pub cache: Option<RawCacheConfig>,
    pub host: Option<RawHostConfig>,
    #[serde(default)]
    pub apps: Vec<RawApp>,
    #[serde(default)]
    pub tokens: Vec<RawToken>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
}

impl From<RawLoggingConfig> for LoggingConfig {
    fn from(raw: RawLoggingConfig) -> Self {
        Self {
            level: raw.level.unwrap_or_else(|| LoggingConfig::default().level),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawStorageConfig {
    pub keyring_service: Option<String>,
    pub dir: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        let defaults = StorageConfig::default();

        let keyring_service = match raw.keyring_service {
            Some(service) if service.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "storage.keyring_service must not be empty".to_string(),
                ))
            }
            Some(service) => service,
            None => defaults.keyring_service,
        };

        let timeout = match raw.timeout_secs {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "storage.timeout_secs must be positive".to_string(),
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        Ok(Self {
            keyring_service,
            dir: raw.dir.as_deref().map(expand_home).unwrap_or(defaults.dir),
            timeout,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawCacheConfig {
    pub sweep_interval_secs: Option<u64>,
}

impl TryFrom<RawCacheConfig> for CacheConfig {
    type Error = ConfigError;

    fn try_from(raw: RawCacheConfig) -> Result<Self, Self::Error> {
        match raw.sweep_interval_secs {
            Some(0) => Err(ConfigError::Invalid(
                "cache.sweep_interval_secs must be positive".to_string(),
            )),
            Some(secs) => Ok(Self {
                sweep_interval: Duration::from_secs(secs),
            }),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawHostConfig {
    pub api_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl TryFrom<RawHostConfig> for HostConfig {
    type Error = ConfigError;

    fn try_from(raw: RawHostConfig) -> Result<Self, Self::Error> {
        let api_url = raw
            .api_url
            .map(|u| {
                Url::parse(&u).map_err(|e| {
                    ConfigError::Invalid(format!("host.api_url '{}' is not a URL: {}", u, e))
                })
            })
            .transpose()?;

        Ok(Self {
            api_url,
            request_timeout: raw
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawApp {
    pub name: String,
    pub app_id: u64,
    pub installation_id: Option<u64>,
    pub private_key_path: Option<String>,
    pub private_key_source: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl TryFrom<RawApp> for Identity {
    type Error = ConfigError;

    fn try_from(raw: RawApp) -> Result<Self, Self::Error> {
        let private_key = match (raw.private_key_path, raw.private_key_source.as_deref()) {
            (Some(path), None) => KeySource::File(expand_home(&path)),
            (None, Some("store")) => KeySource::Store,
            (None, Some(other)) => {
                return Err(ConfigError::Invalid(format!(
                    "app '{}': unknown private_key_source '{}'",
                    raw.name, other
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "app '{}': set either private_key_path or private_key_source, not both",
                    raw.name
                )))
            }
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "app '{}': private_key_path or private_key_source = \"store\" is required",
                    raw.name
                )))
            }
        };

        let mut identity = Identity::app(raw.name, raw.app_id, private_key)
            .with_priority(raw.priority);
        if let Some(installation_id) = raw.installation_id {
            identity = identity.with_installation(installation_id);
        }
        identity.patterns = parse_patterns(&identity.name, &raw.patterns)?;

        identity.validate()?;
        Ok(identity)
    }
}

#[derive(Debug, Deserialize)]
pub struct RawToken {
    pub name: String,
    pub username: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl TryFrom<RawToken> for Identity {
    type Error = ConfigError;

    fn try_from(raw: RawToken) -> Result<Self, Self::Error> {
        let username = raw.username.filter(|u| !u.trim().is_empty());
        let mut identity = Identity::static_token(raw.name, username).with_priority(raw.priority);
        identity.patterns = parse_patterns(&identity.name, &raw.patterns)?;

        identity.validate()?;
        Ok(identity)
    }
}

fn parse_patterns(identity: &str, raw: &[String]) -> Result<Vec<UrlPattern>, ConfigError> {
    raw.iter()
        .map(|p| {
            UrlPattern::parse(p).map_err(|source| ConfigError::Pattern {
                identity: identity.to_string(),
                source,
            })
        })
        .collect()
}
