//! Per-request authentication gate.
//!
//! Header extraction, token validation and permission check run in that
//! order; the first failure ends the request. The gate keeps no per-request
//! state, so one instance serves every request concurrently.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::{HeaderMap, header};

use super::jwks::{JwksResolver, KeyResolver};
use super::permissions::authorize;
use super::token::{Claims, TokenValidator};
use crate::Result;
use crate::config::AuthConfig;
use crate::error::ProxyError;

/// Outcome of [`AuthGate::check`]
#[derive(Debug)]
pub enum AuthDecision {
    /// Token valid and permitted for the route
    Authorized(Claims),
    /// Request refused; render the error as the response
    Denied(ProxyError),
}

impl AuthDecision {
    /// Convert into a `Result` for `?` use
    pub fn into_result(self) -> std::result::Result<Claims, ProxyError> {
        match self {
            Self::Authorized(claims) => Ok(claims),
            Self::Denied(err) => Err(err),
        }
    }
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> std::result::Result<&str, ProxyError> {
    let Some(value) = headers.get(header::AUTHORIZATION).filter(|v| !v.is_empty()) else {
        return Err(ProxyError::authentication(
            "authorization_header_missing",
            "Authorization header is expected.",
        ));
    };

    let must_start_with_bearer = || {
        ProxyError::authentication("invalid_header", "Authorization header must start with Bearer.")
    };

    let value = value.to_str().map_err(|_| must_start_with_bearer())?;
    let parts: Vec<&str> = value.split_whitespace().collect();

    match parts.as_slice() {
        [scheme, ..] if !scheme.eq_ignore_ascii_case("bearer") => Err(must_start_with_bearer()),
        [] => Err(must_start_with_bearer()),
        [_] => Err(ProxyError::authentication("invalid_header", "Token not found.")),
        [_, token] => Ok(*token),
        _ => Err(ProxyError::authentication(
            "invalid_header",
            "Authorization header must be Bearer token.",
        )),
    }
}

/// Authentication and authorization for protected routes
pub struct AuthGate {
    validator: TokenValidator,
}

impl AuthGate {
    /// Gate backed by a caller-supplied key source
    pub fn new(config: &AuthConfig, resolver: Arc<dyn KeyResolver>) -> Result<Self> {
        Ok(Self {
            validator: TokenValidator::new(config, resolver)?,
        })
    }

    /// Gate backed by the configured JWKS endpoint
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let resolver = JwksResolver::new(config)?;
        Self::new(config, Arc::new(resolver))
    }

    /// The underlying validator
    #[must_use]
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Run the full gate for one request.
    pub async fn check(&self, headers: &HeaderMap, required: &BTreeSet<String>) -> AuthDecision {
        match self.authenticate(headers, required).await {
            Ok(claims) => AuthDecision::Authorized(claims),
            Err(err) => AuthDecision::Denied(err),
        }
    }

    async fn authenticate(
        &self,
        headers: &HeaderMap,
        required: &BTreeSet<String>,
    ) -> std::result::Result<Claims, ProxyError> {
        let token = bearer_token(headers)?;
        let claims = self.validator.validate(token).await?;
        authorize(&claims, required)?;
        Ok(claims)
    }
}
