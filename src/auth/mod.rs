//! Credential authentication
//!
//! Given an identity and a target URL, produce a [`Credential`](crate::Credential):
//! - static tokens are read from the secret store
//! - App identities sign an assertion, discover the installation when it is
//!   not configured, and exchange the assertion for an installation token
//!
//! Installation tokens are cached until shortly before their host-declared
//! expiry. Every error names the identity and the stage that failed.

mod authenticator;
mod error;

pub use authenticator::{AuthStats, Authenticator};
pub use error::{AuthError, Stage};
