//! The credential resolution engine
//!
//! [`Engine`] owns the validated identities, the router, the token cache and
//! the authenticator. Callers construct it explicitly with the secret store,
//! host API and clock it should use; nothing here is process-global.

use crate::auth::{AuthError, AuthStats, Authenticator};
use crate::cache::TokenCache;
use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::host::HostApi;
use crate::router::{PatternRouter, Route, TargetUrl};
use crate::storage::SecretStore;
use crate::{Credential, Identity};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A credential together with the identity that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub identity: String,
    pub credential: Credential,
}

pub struct Engine {
    router: RwLock<PatternRouter>,
    cache: Arc<TokenCache>,
    secrets: Arc<SecretStore>,
    authenticator: Authenticator,
}

impl Engine {
    /// Build an engine over `identities`
    ///
    /// Every identity is validated and names must be unique.
    pub fn new(
        identities: Vec<Identity>,
        secrets: Arc<SecretStore>,
        host: Arc<dyn HostApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for identity in &identities {
            identity.validate()?;
            if !seen.insert(identity.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate identity name '{}'",
                    identity.name
                )));
            }
        }

        let cache = Arc::new(TokenCache::new(clock.clone()));
        let authenticator = Authenticator::new(secrets.clone(), host, cache.clone(), clock);

        Ok(Self {
            router: RwLock::new(PatternRouter::new(identities)),
            cache,
            secrets,
            authenticator,
        })
    }

    /// Build an engine from loaded configuration and start the cache sweep
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(
        config: Config,
        secrets: Arc<SecretStore>,
        host: Arc<dyn HostApi>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let engine = Self::new(config.identities, secrets, host, clock)?;
        engine.start_sweeper(config.cache.sweep_interval);
        Ok(engine)
    }

    /// Which identity would serve `url`, without fetching anything
    pub fn route(&self, url: &str) -> Option<Route> {
        self.router.read().route(url)
    }

    /// Resolve the credential for `url`
    ///
    /// `Ok(None)` means abstain: the URL is malformed or no pattern matches.
    pub async fn resolve(&self, url: &str) -> Result<Option<Resolved>, AuthError> {
        let Some(target) = TargetUrl::parse(url) else {
            debug!(url, "not a repository URL, abstaining");
            return Ok(None);
        };
        self.resolve_target(&target).await
    }

    /// Like [`resolve`](Self::resolve) for an already-normalized URL
    pub async fn resolve_target(&self, target: &TargetUrl) -> Result<Option<Resolved>, AuthError> {
        let route = self.router.read().route_target(target);
        let Some(route) = route else {
            debug!(%target, "no identity matches, abstaining");
            return Ok(None);
        };

        if !route.conflicts.is_empty() {
            warn!(
                %target,
                selected = %route.identity.name,
                conflicts = ?route.conflicts,
                "several identities match equally; picked by name"
            );
        }
        debug!(%target, identity = %route.identity.name, match_len = route.match_len, "routed");

        let credential = self
            .authenticator
            .get_credential(&route.identity, target)
            .await?;
        Ok(Some(Resolved {
            identity: route.identity.name.clone(),
            credential,
        }))
    }

    /// Stop routing to an identity and drop its cached credentials
    pub fn remove_identity(&self, name: &str) -> Option<Arc<Identity>> {
        let removed = self.router.write().remove(name)?;
        self.authenticator.forget(&removed);
        debug!(identity = name, "removed identity");
        Some(removed)
    }

    /// A snapshot of the routed identities
    pub fn identities(&self) -> Vec<Arc<Identity>> {
        self.router.read().identities().to_vec()
    }

    pub fn identity(&self, name: &str) -> Option<Arc<Identity>> {
        self.router.read().get(name)
    }

    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    pub fn stats(&self) -> AuthStats {
        self.authenticator.stats()
    }

    /// Start the periodic cache sweep
    pub fn start_sweeper(&self, interval: Duration) {
        self.cache.spawn_sweeper(interval);
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::clock::{ManualClock, SystemClock};
    use crate::host::{HostError, InstallationToken};
    use crate::storage::{Backend, MemoryBackend, SecretKind};
    use crate::{KeySource, Secret};
    use async_trait::async_trait;

    struct NoHost;

    #[async_trait]
    impl HostApi for NoHost {
        async fn discover_installation(
            &self,
            _host: &str,
            _assertion: &Secret,
            owner: &str,
            _repo: Option<&str>,
        ) -> Result<u64, HostError> {
            Err(HostError::NotFound(owner.to_string()))
        }

        async fn create_installation_token(
            &self,
            _host: &str,
            _assertion: &Secret,
            _installation_id: u64,
        ) -> Result<InstallationToken, HostError> {
            Err(HostError::InvalidResponse("unreachable".to_string()))
        }
    }

    fn store() -> Arc<SecretStore> {
        Arc::new(SecretStore::new(
            Arc::new(MemoryBackend::new(Backend::Encrypted)),
            Arc::new(MemoryBackend::new(Backend::File)),
        ))
    }

    fn engine(identities: Vec<Identity>) -> Result<Engine, ConfigError> {
        Engine::new(identities, store(), Arc::new(NoHost), Arc::new(SystemClock))
    }

    fn token(name: &str, pattern: &str) -> Identity {
        Identity::static_token(name, None).with_pattern(pattern).unwrap()
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = engine(vec![
            token("pat", "github.com/*"),
            token("pat", "github.com/acme/*"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_rejects_invalid_identity() {
        let no_patterns = Identity::app("bot", 7, KeySource::Store);
        assert!(engine(vec![no_patterns]).is_err());
    }

    #[tokio::test]
    async fn test_abstains() {
        let engine = engine(vec![token("pat", "github.com/acme/*")]).unwrap();
        assert!(engine.resolve("").await.unwrap().is_none());
        assert!(engine.resolve("not a url").await.unwrap().is_none());
        assert!(engine
            .resolve("https://gitlab.com/acme/widgets")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resolves_static_token() {
        let engine = engine(vec![
            token("broad", "github.com/*"),
            token("narrow", "github.com/acme/*"),
        ])
        .unwrap();
        engine
            .secrets()
            .store("narrow", SecretKind::AccessToken, &Secret::new("ghp_narrow"))
            .await
            .unwrap();

        let resolved = engine
            .resolve("https://github.com/acme/widgets.git")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.identity, "narrow");
        assert_eq!(resolved.credential.secret.expose(), "ghp_narrow");
    }

    #[tokio::test]
    async fn test_errors_name_the_identity() {
        let engine = engine(vec![token("pat", "github.com/*")]).unwrap();
        let err = engine
            .resolve("https://github.com/acme/widgets")
            .await
            .unwrap_err();
        assert_eq!(err.identity(), "pat");
    }

    #[test]
    fn test_remove_identity_reroutes() {
        let engine = engine(vec![
            token("broad", "github.com/*"),
            token("narrow", "github.com/acme/*"),
        ])
        .unwrap();
        assert_eq!(
            engine.route("github.com/acme/widgets").unwrap().identity.name,
            "narrow"
        );

        assert!(engine.remove_identity("narrow").is_some());
        assert!(engine.remove_identity("narrow").is_none());
        assert_eq!(
            engine.route("github.com/acme/widgets").unwrap().identity.name,
            "broad"
        );
        assert_eq!(engine.identities().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_from_config_sweeps_on_its_own() {
        let config = Config::parse(
            r#"
            [cache]
            sweep_interval_secs = 30

            [[tokens]]
            name = "pat"
            patterns = ["github.com/*"]
            "#,
        )
        .unwrap();
        let clock = Arc::new(ManualClock::new(
            chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let engine = Engine::from_config(config, store(), Arc::new(NoHost), clock.clone()).unwrap();
        assert!(engine.cache().is_sweeping());

        engine.cache().put(
            CacheKey::new("github.com", 1, 1),
            Secret::new("ghs_short"),
            clock.now() + chrono::Duration::minutes(6),
        );
        clock.advance(chrono::Duration::minutes(2));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(engine.cache().is_empty());

        engine.shutdown().await;
        assert!(!engine.cache().is_sweeping());
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let engine = engine(vec![token("pat", "github.com/*")]).unwrap();
        engine.start_sweeper(Duration::from_secs(60));
        assert!(engine.cache().is_sweeping());
        engine.shutdown().await;
        assert!(!engine.cache().is_sweeping());
    }
}
