//! Bearer token validation.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to read `alg` and `kid`.
//! 2. Reject any `alg` outside the configured allow-list.
//! 3. Resolve the verification key for `kid` through the [`KeyResolver`].
//! 4. Verify the signature and the `exp`, `nbf`, `iss` and `aud` claims.
//! 5. Return the [`Claims`] the rest of the request needs.
//!
//! Structural and cryptographic failures all collapse into `invalid_token`
//! so a caller cannot tell a bad signature from a malformed token. Claim
//! failures keep their own codes.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::jwks::{KeyError, KeyResolver};
use crate::config::AuthConfig;
use crate::error::ProxyError;
use crate::{Error, Result};

/// Claims of a validated token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// `iss`
    pub issuer: String,
    /// `sub`, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `aud`, normalized to a list
    pub audience: Vec<String>,
    /// `exp` (Unix seconds)
    pub expires_at: u64,
    /// `nbf` (Unix seconds), when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<u64>,
    /// Permissions granted to the bearer
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Payload as it appears on the wire. Registered claims are optional here:
/// `jsonwebtoken` deserializes the payload before checking required claims,
/// and an absent claim must surface as `missing_claim`, not a decode error.
#[derive(Debug, Clone, Deserialize)]
struct RawClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl RawClaims {
    fn into_claims(self, permissions_claim: &str) -> Claims {
        let permissions = match self.extra.get(permissions_claim) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            // OAuth `scope` style: space-delimited
            Some(serde_json::Value::String(s)) => {
                s.split_whitespace().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        };

        Claims {
            issuer: self.iss.unwrap_or_default(),
            subject: self.sub,
            audience: match self.aud {
                Some(Audience::One(aud)) => vec![aud],
                Some(Audience::Many(aud)) => aud,
                None => Vec::new(),
            },
            expires_at: self.exp.unwrap_or_default(),
            not_before: self.nbf,
            permissions,
        }
    }
}

fn invalid_token() -> ProxyError {
    ProxyError::authentication("invalid_token", "Unable to decode authentication token.")
}

fn key_not_found() -> ProxyError {
    ProxyError::authentication("invalid_header", "Unable to find appropriate key.")
}

/// Map a `jsonwebtoken` failure onto the client-facing error.
fn claim_error(err: &jsonwebtoken::errors::Error) -> ProxyError {
    match err.kind() {
        ErrorKind::ExpiredSignature => {
            ProxyError::authentication("token_expired", "The token is expired.")
        }
        ErrorKind::ImmatureSignature => {
            ProxyError::authentication("token_not_yet_valid", "The token is not valid yet.")
        }
        ErrorKind::InvalidIssuer => {
            ProxyError::authentication("invalid_issuer", "Invalid claim \"iss\".")
        }
        ErrorKind::InvalidAudience => {
            ProxyError::authentication("invalid_audience", "Invalid claim \"aud\".")
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            ProxyError::authentication("missing_claim", format!("Missing \"{claim}\" claim."))
        }
        _ => invalid_token(),
    }
}

/// Validates bearer tokens against a fixed issuer, audience and algorithm set.
pub struct TokenValidator {
    resolver: Arc<dyn KeyResolver>,
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
    leeway: u64,
    permissions_claim: String,
}

impl TokenValidator {
    /// Create a validator from configuration and a key source.
    pub fn new(config: &AuthConfig, resolver: Arc<dyn KeyResolver>) -> Result<Self> {
        let issuer = config
            .expected_issuer()
            .ok_or_else(|| Error::Config("auth.domain or auth.issuer is required".to_string()))?;
        let audience = config
            .audience
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::Config("auth.audience is required".to_string()))?;

        Ok(Self {
            resolver,
            issuer,
            audience,
            algorithms: config.allowed_algorithms()?,
            leeway: config.leeway.as_secs(),
            permissions_claim: config.permissions_claim.clone(),
        })
    }

    /// Expected `iss`
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected `aud`
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Validate `token` and return its claims.
    pub async fn validate(&self, token: &str) -> std::result::Result<Claims, ProxyError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| invalid_token())?;

        if !self.algorithms.contains(&header.alg) {
            return Err(invalid_token());
        }

        let kid = header.kid.as_deref().ok_or_else(key_not_found)?;
        let key = self.resolver.resolve(kid).await.map_err(|e| match e {
            KeyError::NotFound(_) => key_not_found(),
            KeyError::Unavailable(cause) => {
                error!(error = %cause, "Unable to fetch signing keys");
                ProxyError::authentication("invalid_header", "Unable to fetch signing keys.")
            }
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway;

        let data = jsonwebtoken::decode::<RawClaims>(token, &key, &validation)
            .map_err(|e| claim_error(&e))?;

        Ok(data.claims.into_claims(&self.permissions_claim))
    }
}
