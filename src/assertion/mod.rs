//! App assertions
//!
//! An App proves it owns its registration by signing a short-lived RS256
//! JWT with its private key. Assertions are generated per exchange and never
//! stored.

mod jwt;
mod key;

pub use jwt::{sign_assertion, validate_assertion, AssertionClaims, ASSERTION_LIFETIME_SECS};
pub use key::{read_key_file, KeyFormat, PrivateKey};

use std::path::PathBuf;
use thiserror::Error;

/// Assertion and private key errors
#[derive(Error, Debug)]
pub enum AssertionError {
    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Private key {path} is accessible by group or other (mode {mode:o}); use chmod 600")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("Failed to read private key {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Malformed assertion: {0}")]
    Malformed(String),

    #[error("Unsupported assertion algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
