//! Route permission checks.

use std::collections::BTreeSet;

use super::token::Claims;
use crate::error::ProxyError;

/// Authorize `claims` against a route's permission set.
///
/// An empty set admits any validated token. Otherwise the token must carry
/// at least one of the listed permissions. The denial lists the whole set,
/// never what the caller already holds.
pub fn authorize(claims: &Claims, required: &BTreeSet<String>) -> Result<(), ProxyError> {
    if required.is_empty() || claims.permissions.iter().any(|p| required.contains(p)) {
        return Ok(());
    }

    Err(ProxyError::Authorization {
        required: required.iter().cloned().collect(),
    })
}
