//! Authenticator errors

use crate::assertion::AssertionError;
use crate::host::HostError;
use crate::storage::{SecretKind, StorageError};
use std::fmt;
use thiserror::Error;

/// Which step of credential resolution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading a secret from the secret store
    Secret,
    /// Loading or parsing the App private key
    PrivateKey,
    /// Signing the App assertion
    Sign,
    /// Discovering the installation id
    Discover,
    /// Exchanging the assertion for an installation token
    Exchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Secret => "secret",
            Stage::PrivateKey => "private_key",
            Stage::Sign => "sign",
            Stage::Discover => "discover",
            Stage::Exchange => "exchange",
        };
        f.write_str(name)
    }
}

/// A failed resolution, tagged with the identity and stage
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("identity '{identity}': no {kind} found in any secret backend")]
    SecretNotFound { identity: String, kind: SecretKind },

    #[error("identity '{identity}': secret store failed: {source}")]
    Storage {
        identity: String,
        #[source]
        source: StorageError,
    },

    #[error("identity '{identity}': private key unusable: {source}")]
    PrivateKey {
        identity: String,
        #[source]
        source: AssertionError,
    },

    #[error("identity '{identity}': signing assertion failed: {source}")]
    Sign {
        identity: String,
        #[source]
        source: AssertionError,
    },

    #[error("identity '{identity}': cannot discover installation for '{target}' without an owner")]
    MissingOwner { identity: String, target: String },

    #[error("identity '{identity}': App is not installed for '{target}'")]
    InstallationNotFound { identity: String, target: String },

    #[error("identity '{identity}': installation discovery failed: {source}")]
    Discover {
        identity: String,
        #[source]
        source: HostError,
    },

    #[error("identity '{identity}': token exchange failed: {source}")]
    Exchange {
        identity: String,
        #[source]
        source: HostError,
    },
}

impl AuthError {
    /// The stage that failed
    pub fn stage(&self) -> Stage {
        match self {
            AuthError::SecretNotFound { .. } | AuthError::Storage { .. } => Stage::Secret,
            AuthError::PrivateKey { .. } => Stage::PrivateKey,
            AuthError::Sign { .. } => Stage::Sign,
            AuthError::MissingOwner { .. }
            | AuthError::InstallationNotFound { .. }
            | AuthError::Discover { .. } => Stage::Discover,
            AuthError::Exchange { .. } => Stage::Exchange,
        }
    }

    /// The identity whose resolution failed
    pub fn identity(&self) -> &str {
        match self {
            AuthError::SecretNotFound { identity, .. }
            | AuthError::Storage { identity, .. }
            | AuthError::PrivateKey { identity, .. }
            | AuthError::Sign { identity, .. }
            | AuthError::MissingOwner { identity, .. }
            | AuthError::InstallationNotFound { identity, .. }
            | AuthError::Discover { identity, .. }
            | AuthError::Exchange { identity, .. } => identity,
        }
    }
}
