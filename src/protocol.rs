//! Git credential helper protocol
//!
//! Git writes `key=value` lines terminated by a blank line or EOF, and reads
//! the same format back. Only `get` produces output; `store` and `erase` are
//! accepted and ignored since installation tokens are never persisted by git.

use crate::router::TargetUrl;
use crate::Credential;
use std::fmt::Write as _;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed credential line: {0:?}")]
    Malformed(String),

    #[error("{0} contains a newline or NUL")]
    InvalidValue(&'static str),

    #[error("failed to read request: {0}")]
    Io(#[from] std::io::Error),
}

/// The attributes of a credential request this helper cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
}

impl CredentialRequest {
    /// Parse a request from its text form
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let mut request = Self::default();
        for line in input.lines() {
            if line.is_empty() {
                break;
            }
            request.apply(line)?;
        }
        Ok(request)
    }

    /// Read a request from git, stopping at a blank line or EOF
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut request = Self::default();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            request.apply(trimmed)?;
        }
        Ok(request)
    }

    fn apply(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        let value = Some(value.to_string());
        match key {
            "protocol" => self.protocol = value,
            "host" => self.host = value,
            "path" => self.path = value,
            "url" => self.url = value,
            // username, capability[], wwwauth[] and future keys
            _ => {}
        }
        Ok(())
    }

    /// The repository this request is about, or `None` to abstain
    ///
    /// Only http and https requests are answered. Without `path` (git's
    /// `credential.useHttpPath` unset) the target is the host alone.
    pub fn target(&self) -> Option<TargetUrl> {
        let (protocol, host, path) = match (&self.protocol, &self.host) {
            (Some(protocol), Some(host)) => {
                (protocol.as_str(), host.as_str(), self.path.as_deref().unwrap_or(""))
            }
            _ => {
                let url = url::Url::parse(self.url.as_deref()?).ok()?;
                if !is_http(url.scheme()) {
                    return None;
                }
                return TargetUrl::parse(url.as_str());
            }
        };

        if !is_http(protocol) {
            return None;
        }
        TargetUrl::parse(&format!(
            "{}://{}/{}",
            protocol,
            host,
            path.trim_start_matches('/')
        ))
    }
}

fn is_http(protocol: &str) -> bool {
    protocol.eq_ignore_ascii_case("https") || protocol.eq_ignore_ascii_case("http")
}

/// Format a `get` response
pub fn format_response(credential: &Credential) -> Result<String, ProtocolError> {
    let username = credential.username.as_str();
    let password = credential.secret.expose();
    if username.contains(['\n', '\0']) {
        return Err(ProtocolError::InvalidValue("username"));
    }
    if password.contains(['\n', '\0']) {
        return Err(ProtocolError::InvalidValue("password"));
    }

    let mut out = String::with_capacity(username.len() + password.len() + 20);
    // Writing to a String cannot fail
    let _ = writeln!(out, "username={}", username);
    let _ = writeln!(out, "password={}", password);
    Ok(out)
}
