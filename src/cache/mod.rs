//! In-memory installation token cache
//!
//! Installation tokens are cached per (host, App, installation) until
//! shortly before the host-declared expiry. Nothing here is ever written to disk:
//! the cache lives and dies with the process.
//!
//! # Expiry
//!
//! On [`TokenCache::put`] the entry's `expires_at` is set to the host expiry
//! minus [`SAFETY_MARGIN_SECS`], floored at the insertion time. A lookup at
//! `now > expires_at` is a miss.
//!
//! # Sweeping
//!
//! [`TokenCache::spawn_sweeper`] starts a background task that wakes every
//! interval and drops expired entries. Evicted tokens are zeroized as they
//! are dropped. The task stops on [`TokenCache::shutdown`] or when the cache
//! is dropped.

use crate::clock::Clock;
use crate::Secret;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Time subtracted from the host-declared expiry (5 minutes)
pub const SAFETY_MARGIN_SECS: i64 = 300;

/// Default interval of the background sweep
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Cache key: one entry per App installation
///
/// The host is part of the key because App and installation ids are only
/// unique within one GitHub instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    pub app_id: u64,
    pub installation_id: u64,
}

impl CacheKey {
    pub fn new(host: impl Into<String>, app_id: u64, installation_id: u64) -> Self {
        Self {
            host: host.into(),
            app_id,
            installation_id,
        }
    }
}

/// A cached token and its lifetime
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: Secret,
    pub created_at: DateTime<Utc>,
    /// Last instant the token may be served
    pub expires_at: DateTime<Utc>,
}

/// Shared cache of installation tokens
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, CachedToken>>,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
    /// Handle of the sweeper task, if running
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TokenCache {
    /// Create an empty cache
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            cancel_token: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Return the token for `key` if it is still within its safe lifetime
    pub fn get(&self, key: &CacheKey) -> Option<Secret> {
        self.get_entry(key).map(|entry| entry.token)
    }

    /// Return the full entry for `key` if it is still within its safe lifetime
    pub fn get_entry(&self, key: &CacheKey) -> Option<CachedToken> {
        let now = self.clock.now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if now <= entry.expires_at => Some(entry.clone()),
            Some(_) => {
                trace!(host = %key.host, app_id = key.app_id, installation_id = key.installation_id, "cached token expired");
                None
            }
            None => None,
        }
    }

    /// Store a token, replacing any previous entry for `key`
    ///
    /// Returns the computed `expires_at`.
    pub fn put(&self, key: CacheKey, token: Secret, host_expiry: DateTime<Utc>) -> DateTime<Utc> {
        let created_at = self.clock.now();
        let expires_at = (host_expiry - Duration::seconds(SAFETY_MARGIN_SECS)).max(created_at);

        debug!(
            host = %key.host,
            app_id = key.app_id,
            installation_id = key.installation_id,
            fingerprint = %token.fingerprint(),
            %expires_at,
            "caching installation token"
        );

        let entry = CachedToken {
            token,
            created_at,
            expires_at,
        };
        // The replaced entry is dropped (and zeroized) after the lock is released
        let _previous = self.entries.write().insert(key, entry);
        expires_at
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let evicted: Vec<CachedToken> = {
            let mut entries = self.entries.write();
            let expired: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| now > entry.expires_at)
                .map(|(key, _)| key.clone())
                .collect();
            expired
                .iter()
                .filter_map(|key| entries.remove(key))
                .collect()
        };

        let count = evicted.len();
        if count > 0 {
            debug!(count, "swept expired installation tokens");
        }
        count
    }

    /// Remove the entry for `key`
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry belonging to `app_id`
    pub fn invalidate_app(&self, app_id: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.app_id != app_id);
        before - entries.len()
    }

    /// Number of entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the background sweep
    ///
    /// Calling this again replaces the previous task.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) {
        let cache: Weak<Self> = Arc::downgrade(self);
        let token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("token cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match cache.upgrade() {
                            Some(cache) => {
                                cache.sweep();
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background sweep and wait for it to finish
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "token cache sweeper panicked");
                }
            }
        }
    }

    /// Whether the background sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TokenCache {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
