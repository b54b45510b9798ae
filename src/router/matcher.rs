//! URL normalization and prefix pattern matching

use std::fmt;
use thiserror::Error;
use url::Url;

/// Pattern parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern must not be empty")]
    Empty,

    #[error("pattern '{0}': wildcard is only allowed as the final segment")]
    MisplacedWildcard(String),

    #[error("pattern '{0}': missing host")]
    MissingHost(String),
}

/// A repository URL reduced to `host/owner/repo` form
///
/// Scheme, embedded credentials, trailing slashes and a `.git` suffix are
/// removed. The host is lowercased; path segments keep their case for API
/// calls, while [`TargetUrl::match_key`] is fully lowercased for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    host: String,
    segments: Vec<String>,
}

impl TargetUrl {
    /// Normalize a URL. Returns `None` for empty or malformed input.
    ///
    /// Accepts `scheme://[user@]host[:port]/path`, scp-like
    /// `user@host:owner/repo` and bare `host/owner/repo`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() || input.chars().any(char::is_whitespace) {
            return None;
        }

        let (host, path) = if input.contains("://") {
            let url = Url::parse(input).ok()?;
            let host = url.host_str()?.to_ascii_lowercase();
            let host = match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            };
            (host, url.path().to_string())
        } else {
            split_schemeless(input)?
        };

        let host = host.trim_end_matches('.').to_string();
        if host.is_empty() || host.contains('@') || host.contains('/') {
            return None;
        }

        let mut segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(last) = segments.last_mut() {
            if let Some(stripped) = last.strip_suffix(".git") {
                *last = stripped.to_string();
            }
        }
        segments.retain(|s| !s.is_empty());

        Some(Self { host, segments })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// First path segment (the account that owns the repository)
    pub fn owner(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Second path segment
    pub fn repo(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }

    /// Lowercased `host/owner/repo` string used for pattern matching
    pub fn match_key(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Split `user@host:owner/repo`, `host:port/path` or `host/path`
fn split_schemeless(input: &str) -> Option<(String, String)> {
    let slash = input.find('/');
    let colon = input.find(':');

    let (authority, path) = match (colon, slash) {
        // scp-like form unless the colon introduces a numeric port
        (Some(c), s) if s.map_or(true, |s| c < s) => {
            let after = &input[c + 1..];
            let port_len = after.find('/').unwrap_or(after.len());
            let is_port =
                port_len > 0 && after[..port_len].chars().all(|ch| ch.is_ascii_digit());
            if is_port {
                match slash {
                    Some(s) => (&input[..s], &input[s..]),
                    None => (input, ""),
                }
            } else {
                (&input[..c], after)
            }
        }
        (_, Some(s)) => (&input[..s], &input[s..]),
        (_, None) => (input, ""),
    };

    let host = match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    };

    Some((host.to_ascii_lowercase(), path.to_string()))
}

/// A routing pattern: `host[/owner[/repo]]`, optionally ending in `/*`
///
/// A lone `*` matches every URL with length zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    raw: String,
    /// Normalized, lowercased. For wildcard patterns this ends in `/`
    /// (or is empty for a lone `*`).
    prefix: String,
    wildcard: bool,
}

impl UrlPattern {
    /// Parse and normalize a pattern
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PatternError::Empty);
        }

        if trimmed == "*" {
            return Ok(Self {
                raw: trimmed.to_string(),
                prefix: String::new(),
                wildcard: true,
            });
        }

        let (body, wildcard) = match trimmed.strip_suffix("/*") {
            Some(body) => (body, true),
            None => (trimmed, false),
        };
        if body.contains('*') {
            return Err(PatternError::MisplacedWildcard(trimmed.to_string()));
        }

        let target = TargetUrl::parse(body)
            .ok_or_else(|| PatternError::MissingHost(trimmed.to_string()))?;
        let mut prefix = target.match_key();
        if wildcard {
            prefix.push('/');
        }

        Ok(Self {
            raw: trimmed.to_string(),
            prefix,
            wildcard,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Number of characters this pattern matches of `key`, or `None`
    ///
    /// `key` must be a [`TargetUrl::match_key`].
    pub fn match_len(&self, key: &str) -> Option<usize> {
        if self.wildcard {
            key.starts_with(&self.prefix).then_some(self.prefix.len())
        } else {
            (key == self.prefix).then_some(self.prefix.len())
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
