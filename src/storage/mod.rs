//! Secret storage for private keys and stored tokens
//!
//! Two backends sit behind [`SecretBackend`]: the OS keyring
//! ([`KeyringBackend`], the encrypted store) and owner-only files
//! ([`FileBackend`]). [`SecretStore`] orders them: the keyring is always
//! tried first and the file store is the fallback. Every backend call is
//! bounded by a timeout so a hung keyring daemon degrades to the file store
//! instead of blocking git.

mod file;
mod keychain;
mod memory;

pub use file::FileBackend;
pub use keychain::{KeyringBackend, DEFAULT_SERVICE};
pub use memory::MemoryBackend;

use crate::Secret;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default bound on every backend call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("{0} backend timed out after {1:?}")]
    Timeout(Backend, Duration),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid secret name: {0}")]
    InvalidName(String),

    #[error("Unknown secret kind: {0}")]
    UnknownKind(String),

    #[error("stale copy left in the {backend} backend: {source}")]
    Shadowed {
        backend: Backend,
        #[source]
        source: Box<StorageError>,
    },
}

/// What a stored secret is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    PrivateKey,
    AccessToken,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::PrivateKey => "private_key",
            SecretKind::AccessToken => "access_token",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private_key" | "private-key" => Ok(SecretKind::PrivateKey),
            "access_token" | "access-token" | "token" => Ok(SecretKind::AccessToken),
            other => Err(StorageError::UnknownKind(other.to_string())),
        }
    }
}

/// The closed set of storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// OS keyring (Keychain, Credential Manager, kernel keyring)
    Encrypted,
    /// Owner-only files on disk
    File,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Encrypted => write!(f, "encrypted"),
            Backend::File => write!(f, "file"),
        }
    }
}

/// A single place secrets can be kept
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// Fetch a secret; `Ok(None)` when absent
    async fn get(&self, name: &str, kind: SecretKind) -> Result<Option<Secret>, StorageError>;

    /// Store a secret, replacing any previous value
    async fn set(&self, name: &str, kind: SecretKind, value: &Secret) -> Result<(), StorageError>;

    /// Remove a secret; returns whether anything was removed
    async fn delete(&self, name: &str, kind: SecretKind) -> Result<bool, StorageError>;
}

/// Secret names become file names and keyring accounts
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Ordered keyring-then-file secret storage
pub struct SecretStore {
    encrypted: Arc<dyn SecretBackend>,
    file: Arc<dyn SecretBackend>,
    timeout: Duration,
}

impl SecretStore {
    /// Create a store from an encrypted and a file backend
    pub fn new(encrypted: Arc<dyn SecretBackend>, file: Arc<dyn SecretBackend>) -> Self {
        Self {
            encrypted,
            file,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, backend: Backend, op: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StorageError::Timeout(backend, self.timeout))?
    }

    /// Store a secret, returning the backend that holds it
    pub async fn store(
        &self,
        name: &str,
        kind: SecretKind,
        value: &Secret,
    ) -> Result<Backend, StorageError> {
        validate_name(name)?;

        match self
            .bounded(Backend::Encrypted, self.encrypted.set(name, kind, value))
            .await
        {
            Ok(()) => {
                if let Err(e) = self.bounded(Backend::File, self.file.delete(name, kind)).await {
                    warn!(name, %kind, error = %e, "failed to remove stale file copy");
                }
                debug!(name, %kind, "stored secret in encrypted backend");
                Ok(Backend::Encrypted)
            }
            Err(encrypted_err) => {
                warn!(name, %kind, error = %encrypted_err, "encrypted backend failed, using file backend");
                self.bounded(Backend::File, self.file.set(name, kind, value))
                    .await?;

                if let Err(e) = self.clear_encrypted(name, kind).await {
                    // The keyring copy would shadow the new file copy on every read
                    if let Err(undo) = self.bounded(Backend::File, self.file.delete(name, kind)).await {
                        warn!(name, %kind, error = %undo, "failed to roll back file copy");
                    }
                    return Err(e);
                }
                Ok(Backend::File)
            }
        }
    }

    /// Remove the encrypted copy of a secret
    ///
    /// A failed delete is only an error when the copy is still readable; a
    /// keyring that cannot be reached at all cannot shadow the file store.
    async fn clear_encrypted(&self, name: &str, kind: SecretKind) -> Result<(), StorageError> {
        let delete_err = match self
            .bounded(Backend::Encrypted, self.encrypted.delete(name, kind))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        match self
            .bounded(Backend::Encrypted, self.encrypted.get(name, kind))
            .await
        {
            Ok(Some(_)) => Err(StorageError::Shadowed {
                backend: Backend::Encrypted,
                source: Box::new(delete_err),
            }),
            Ok(None) => Ok(()),
            Err(e) => {
                debug!(name, %kind, error = %e, "encrypted backend unreachable, nothing to clear");
                Ok(())
            }
        }
    }

    /// Fetch a secret from the first backend that has it
    pub async fn get(
        &self,
        name: &str,
        kind: SecretKind,
    ) -> Result<Option<(Secret, Backend)>, StorageError> {
        validate_name(name)?;

        match self
            .bounded(Backend::Encrypted, self.encrypted.get(name, kind))
            .await
        {
            Ok(Some(value)) => return Ok(Some((value, Backend::Encrypted))),
            Ok(None) => {}
            Err(e) => warn!(name, %kind, error = %e, "encrypted backend failed, trying file backend"),
        }

        let value = self
            .bounded(Backend::File, self.file.get(name, kind))
            .await?;
        Ok(value.map(|v| (v, Backend::File)))
    }

    /// Remove a secret from both backends
    pub async fn delete(&self, name: &str, kind: SecretKind) -> Result<(), StorageError> {
        validate_name(name)?;

        let encrypted = self.clear_encrypted(name, kind).await;
        self.bounded(Backend::File, self.file.delete(name, kind))
            .await?;
        encrypted
    }

    /// Probe the encrypted backend with a throwaway write and delete
    ///
    /// The whole round-trip is bounded by the store timeout.
    pub async fn available(&self) -> bool {
        let name = format!("probe-{}", Uuid::new_v4());
        let probe = Secret::new("probe");
        let round_trip = async {
            self.encrypted
                .set(&name, SecretKind::AccessToken, &probe)
                .await?;
            self.encrypted.delete(&name, SecretKind::AccessToken).await
        };

        match self.bounded(Backend::Encrypted, round_trip).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "encrypted backend unavailable");
                false
            }
        }
    }
}
