//! RS256 App assertions

use super::{AssertionError, PrivateKey};
use crate::Secret;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};

/// Lifetime of every assertion. The host caps assertions at ten minutes, so
/// this is fixed rather than configurable.
pub const ASSERTION_LIFETIME_SECS: i64 = 600;

/// Claims carried by an App assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer - the App id
    pub iss: String,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expiration (seconds since epoch)
    pub exp: i64,
}

impl AssertionClaims {
    fn new(app_id: u64, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: app_id.to_string(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// Sign a fresh assertion for `app_id`, issued at `now`
pub fn sign_assertion(
    app_id: u64,
    key: &PrivateKey,
    now: DateTime<Utc>,
) -> Result<Secret, AssertionError> {
    let claims = AssertionClaims::new(app_id, now);
    let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key.encoding_key())
        .map_err(|e| AssertionError::Signing(e.to_string()))?;
    Ok(Secret::new(token))
}

/// Structurally validate an assertion and return its claims
///
/// Checks the three-part shape, the RS256 header and that the claims decode
/// with an issuer. The signature is not verified; this is for diagnostics.
pub fn validate_assertion(assertion: &str) -> Result<AssertionClaims, AssertionError> {
    let parts: Vec<&str> = assertion.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(AssertionError::Malformed(
            "assertion must have 3 non-empty parts separated by dots".to_string(),
        ));
    }

    let header = jsonwebtoken::decode_header(assertion)
        .map_err(|e| AssertionError::Malformed(format!("failed to decode header: {}", e)))?;
    if header.alg != Algorithm::RS256 {
        return Err(AssertionError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AssertionError::Malformed(format!("failed to decode claims: {}", e)))?;
    let claims: AssertionClaims = serde_json::from_slice(&payload)
        .map_err(|e| AssertionError::Malformed(format!("failed to parse claims: {}", e)))?;

    if claims.iss.is_empty() {
        return Err(AssertionError::Malformed("missing iss claim".to_string()));
    }
    if claims.exp <= claims.iat {
        return Err(AssertionError::Malformed("exp is not after iat".to_string()));
    }

    Ok(claims)
}
