//! Credential resolution for a single identity

use super::AuthError;
use crate::assertion::{read_key_file, sign_assertion, PrivateKey};
use crate::cache::{CacheKey, TokenCache};
use crate::clock::Clock;
use crate::host::{HostApi, HostError};
use crate::router::TargetUrl;
use crate::storage::{SecretKind, SecretStore};
use crate::{AppIdentity, Credential, Identity, IdentityKind, KeySource, Secret, DEFAULT_USERNAME};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters describing the work the authenticator has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthStats {
    pub assertions_signed: u64,
    pub discoveries: u64,
    pub exchanges: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Key of a discovered installation id, one per repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstallationLookup {
    app_id: u64,
    host: String,
    owner: String,
    repo: Option<String>,
}

impl InstallationLookup {
    fn new(app_id: u64, target: &TargetUrl) -> Option<Self> {
        Some(Self {
            app_id,
            host: target.host().to_string(),
            owner: target.owner()?.to_ascii_lowercase(),
            repo: target.repo().map(str::to_ascii_lowercase),
        })
    }
}

/// Turns an identity into a usable credential
///
/// Static tokens come straight from the secret store. App identities are
/// served from the token cache when possible; otherwise a fresh assertion is
/// signed and exchanged with the host, and the result is cached. Failures
/// never touch the cache, and nothing is retried here.
pub struct Authenticator {
    secrets: Arc<SecretStore>,
    host: Arc<dyn HostApi>,
    cache: Arc<TokenCache>,
    clock: Arc<dyn Clock>,
    /// Discovered installation ids, process lifetime only
    installations: RwLock<HashMap<InstallationLookup, u64>>,
    assertions_signed: AtomicU64,
    discoveries: AtomicU64,
    exchanges: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl Authenticator {
    pub fn new(
        secrets: Arc<SecretStore>,
        host: Arc<dyn HostApi>,
        cache: Arc<TokenCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secrets,
            host,
            cache,
            clock,
            installations: RwLock::new(HashMap::new()),
            assertions_signed: AtomicU64::new(0),
            discoveries: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Resolve the credential `identity` presents for `target`
    pub async fn get_credential(
        &self,
        identity: &Identity,
        target: &TargetUrl,
    ) -> Result<Credential, AuthError> {
        match &identity.kind {
            IdentityKind::StaticToken { username } => {
                self.static_token(identity, username.as_deref()).await
            }
            IdentityKind::App(app) => self.app_token(identity, app, target).await,
        }
    }

    /// Drop cached tokens and discovered installations for `identity`
    pub fn forget(&self, identity: &Identity) {
        if let Some(app) = identity.as_app() {
            let removed = self.cache.invalidate_app(app.app_id);
            self.installations
                .write()
                .retain(|lookup, _| lookup.app_id != app.app_id);
            debug!(identity = %identity.name, removed, "forgot cached credentials");
        }
    }

    pub fn stats(&self) -> AuthStats {
        AuthStats {
            assertions_signed: self.assertions_signed.load(Ordering::Relaxed),
            discoveries: self.discoveries.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    async fn static_token(
        &self,
        identity: &Identity,
        username: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let found = self
            .secrets
            .get(&identity.name, SecretKind::AccessToken)
            .await
            .map_err(|source| AuthError::Storage {
                identity: identity.name.clone(),
                source,
            })?;

        let (token, backend) = match found {
            Some((token, backend)) if !token.is_empty() => (token, backend),
            _ => {
                return Err(AuthError::SecretNotFound {
                    identity: identity.name.clone(),
                    kind: SecretKind::AccessToken,
                })
            }
        };

        debug!(
            identity = %identity.name,
            %backend,
            fingerprint = %token.fingerprint(),
            "using stored token"
        );
        Ok(Credential {
            username: username.unwrap_or(DEFAULT_USERNAME).to_string(),
            secret: token,
        })
    }

    async fn app_token(
        &self,
        identity: &Identity,
        app: &AppIdentity,
        target: &TargetUrl,
    ) -> Result<Credential, AuthError> {
        let lookup = InstallationLookup::new(app.app_id, target);
        let known = app.installation_id.or_else(|| {
            lookup
                .as_ref()
                .and_then(|l| self.installations.read().get(l).copied())
        });

        let cache_key = |installation_id| CacheKey::new(target.host(), app.app_id, installation_id);

        if let Some(installation_id) = known {
            if let Some(token) = self.cached(&cache_key(installation_id)) {
                return Ok(installation_credential(token));
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let assertion = {
            let key = self.load_private_key(identity, app).await?;
            sign_assertion(app.app_id, &key, self.clock.now()).map_err(|source| {
                AuthError::Sign {
                    identity: identity.name.clone(),
                    source,
                }
            })?
        };
        self.assertions_signed.fetch_add(1, Ordering::Relaxed);

        let installation_id = match known {
            Some(id) => id,
            None => {
                let lookup = lookup.ok_or_else(|| AuthError::MissingOwner {
                    identity: identity.name.clone(),
                    target: target.to_string(),
                })?;
                let id = self.discover(identity, target, &assertion).await?;
                self.installations.write().insert(lookup, id);

                // Another repository may already have a token for this installation
                if let Some(token) = self.cached(&cache_key(id)) {
                    return Ok(installation_credential(token));
                }
                id
            }
        };

        let issued = self
            .host
            .create_installation_token(target.host(), &assertion, installation_id)
            .await
            .map_err(|source| AuthError::Exchange {
                identity: identity.name.clone(),
                source,
            })?;
        self.exchanges.fetch_add(1, Ordering::Relaxed);

        self.cache.put(
            cache_key(installation_id),
            issued.token.clone(),
            issued.expires_at,
        );
        info!(
            identity = %identity.name,
            installation_id,
            fingerprint = %issued.token.fingerprint(),
            expires_at = %issued.expires_at,
            "issued installation token"
        );

        Ok(installation_credential(issued.token))
    }

    fn cached(&self, key: &CacheKey) -> Option<Secret> {
        let token = self.cache.get(key)?;
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!(
            host = %key.host,
            app_id = key.app_id,
            installation_id = key.installation_id,
            fingerprint = %token.fingerprint(),
            "token cache hit"
        );
        Some(token)
    }

    async fn load_private_key(
        &self,
        identity: &Identity,
        app: &AppIdentity,
    ) -> Result<PrivateKey, AuthError> {
        let key_error = |source| AuthError::PrivateKey {
            identity: identity.name.clone(),
            source,
        };

        match &app.private_key {
            KeySource::File(path) => read_key_file(path).await.map_err(key_error),
            KeySource::Store => {
                let found = self
                    .secrets
                    .get(&identity.name, SecretKind::PrivateKey)
                    .await
                    .map_err(|source| AuthError::Storage {
                        identity: identity.name.clone(),
                        source,
                    })?;
                let (pem, backend) = found.ok_or_else(|| AuthError::SecretNotFound {
                    identity: identity.name.clone(),
                    kind: SecretKind::PrivateKey,
                })?;
                debug!(identity = %identity.name, %backend, "loaded private key");
                PrivateKey::from_pem(pem.expose()).map_err(key_error)
            }
        }
    }

    async fn discover(
        &self,
        identity: &Identity,
        target: &TargetUrl,
        assertion: &Secret,
    ) -> Result<u64, AuthError> {
        // Callers only get here with an owner present
        let owner = target.owner().unwrap_or_default();
        self.discoveries.fetch_add(1, Ordering::Relaxed);

        let id = self
            .host
            .discover_installation(target.host(), assertion, owner, target.repo())
            .await
            .map_err(|source| match source {
                HostError::NotFound(_) => AuthError::InstallationNotFound {
                    identity: identity.name.clone(),
                    target: target.to_string(),
                },
                source => AuthError::Discover {
                    identity: identity.name.clone(),
                    source,
                },
            })?;

        debug!(identity = %identity.name, installation_id = id, %target, "discovered installation");
        Ok(id)
    }
}

fn installation_credential(token: Secret) -> Credential {
    Credential {
        username: DEFAULT_USERNAME.to_string(),
        secret: token,
    }
}
