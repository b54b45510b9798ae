//! Routing of repository URLs to identities
//!
//! Handles:
//! - Normalizing git remote URLs to `host/owner/repo`
//! - Prefix patterns with an optional trailing wildcard
//! - Deterministic selection of a single identity per URL

mod matcher;
mod resolver;

pub use matcher::{PatternError, TargetUrl, UrlPattern};
pub use resolver::{resolve, PatternRouter, Route};
