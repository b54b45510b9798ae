//! OS keyring secret backend
//!
//! Entries live under a fixed service name with the account
//! `<name>:<kind>`. Keyring calls block on platform IPC, so they run on the
//! blocking pool; [`SecretStore`](super::SecretStore) bounds them with its
//! timeout.

use super::{validate_name, Backend, SecretBackend, SecretKind, StorageError};
use crate::Secret;
use async_trait::async_trait;
use keyring::Entry;
use zeroize::Zeroizing;

/// Default keyring service name
pub const DEFAULT_SERVICE: &str = "gh-app-auth";

pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str, kind: SecretKind) -> Result<Entry, StorageError> {
        validate_name(name)?;
        Ok(Entry::new(&self.service, &format!("{}:{}", name, kind))?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("keyring task failed: {}", e)))?
}

#[async_trait]
impl SecretBackend for KeyringBackend {
    fn backend(&self) -> Backend {
        Backend::Encrypted
    }

    async fn get(&self, name: &str, kind: SecretKind) -> Result<Option<Secret>, StorageError> {
        let entry = self.entry(name, kind)?;
        blocking(move || match entry.get_password() {
            Ok(value) => {
                let value = Zeroizing::new(value);
                Ok(Some(Secret::new(value.as_str())))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn set(&self, name: &str, kind: SecretKind, value: &Secret) -> Result<(), StorageError> {
        let entry = self.entry(name, kind)?;
        let value = value.clone();
        blocking(move || Ok(entry.set_password(value.expose())?)).await
    }

    async fn delete(&self, name: &str, kind: SecretKind) -> Result<bool, StorageError> {
        let entry = self.entry(name, kind)?;
        blocking(move || match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
