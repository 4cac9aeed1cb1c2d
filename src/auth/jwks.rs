//! Signing-key resolution against a published JWKS document.
//!
//! # Caching
//!
//! The whole key set is cached and shared by every request. A lookup hits
//! the network only when:
//!
//! - nothing has been fetched yet,
//! - the cached set is older than `jwks_ttl`, or
//! - the `kid` is unknown and the cached set is older than
//!   `jwks_refresh_cooldown` (key rotation).
//!
//! Fetches are single-flight: concurrent misses queue on one async mutex and
//! whoever gets it second re-reads the cache instead of fetching again. A
//! failed fetch never clears a previously cached set.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk, PublicKeyUse},
};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::config::AuthConfig;
use crate::{Error, Result};

/// Key resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The key set does not contain the requested `kid`.
    #[error("Unknown key ID: {0}")]
    NotFound(String),

    /// The key set could not be fetched or parsed.
    #[error("Key set unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a token's `kid` to a verification key.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Look up the key with identifier `kid`.
    async fn resolve(&self, kid: &str) -> std::result::Result<DecodingKey, KeyError>;
}

/// Wire shape of a JWKS document. Keys are parsed one by one so a single
/// unsupported entry does not poison the whole set.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

struct CachedJwks {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

impl CachedJwks {
    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// HTTP-backed, cached [`KeyResolver`].
pub struct JwksResolver {
    url: String,
    http: reqwest::Client,
    ttl: Duration,
    cooldown: Duration,
    cache: RwLock<Option<CachedJwks>>,
    fetch_lock: Mutex<()>,
}

impl JwksResolver {
    /// Build a resolver for the key set configured in `config`.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let url = config
            .jwks_url()
            .ok_or_else(|| Error::Config("auth.domain or auth.jwks_uri is required".to_string()))?;

        let parsed = Url::parse(&url)
            .map_err(|e| Error::Config(format!("Invalid JWKS URL {url:?}: {e}")))?;
        if config.require_https && parsed.scheme() != "https" {
            return Err(Error::Config(format!(
                "JWKS URL must use https (set auth.require_https: false to allow {url})"
            )));
        }

        let http = reqwest::Client::builder()
            .https_only(config.require_https)
            .timeout(config.jwks_timeout)
            .build()?;

        Ok(Self {
            url,
            http,
            ttl: config.jwks_ttl,
            cooldown: config.jwks_refresh_cooldown,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        })
    }

    /// Where keys are fetched from
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of cached keys (0 before the first fetch)
    #[must_use]
    pub fn cached_key_count(&self) -> usize {
        self.cache.read().as_ref().map_or(0, |c| c.keys.len())
    }

    /// Read the cache. `Ok` is a final answer; `Err` carries the fetch time
    /// of the set that was consulted, if any, and means a fetch is warranted.
    fn lookup(&self, kid: &str) -> std::result::Result<DecodingKey, Lookup> {
        let cache = self.cache.read();
        let Some(cached) = cache.as_ref() else {
            return Err(Lookup::Fetch(None));
        };

        let age = cached.age();
        if age >= self.ttl {
            return Err(Lookup::Fetch(Some(cached.fetched_at)));
        }
        if let Some(key) = cached.keys.get(kid) {
            return Ok(key.clone());
        }
        if age < self.cooldown {
            return Err(Lookup::Miss);
        }
        Err(Lookup::Fetch(Some(cached.fetched_at)))
    }

    async fn fetch(&self) -> std::result::Result<HashMap<String, DecodingKey>, KeyError> {
        debug!(url = %self.url, "Fetching JWKS");

        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| KeyError::Unavailable(e.to_string()))?;

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| KeyError::Unavailable(format!("malformed key set: {e}")))?;

        Ok(parse_keys(document.keys))
    }
}

enum Lookup {
    Miss,
    Fetch(Option<Instant>),
}

#[async_trait]
impl KeyResolver for JwksResolver {
    async fn resolve(&self, kid: &str) -> std::result::Result<DecodingKey, KeyError> {
        let observed = match self.lookup(kid) {
            Ok(key) => return Ok(key),
            Err(Lookup::Miss) => return Err(KeyError::NotFound(kid.to_string())),
            Err(Lookup::Fetch(observed)) => observed,
        };

        let _guard = self.fetch_lock.lock().await;

        // Someone else refreshed while we waited: answer from their set.
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref()
                && Some(cached.fetched_at) != observed
            {
                return cached
                    .keys
                    .get(kid)
                    .cloned()
                    .ok_or_else(|| KeyError::NotFound(kid.to_string()));
            }
        }

        let keys = self.fetch().await?;
        info!(url = %self.url, keys = keys.len(), "Refreshed signing keys");

        let key = keys.get(kid).cloned();
        *self.cache.write() = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or_else(|| KeyError::NotFound(kid.to_string()))
    }
}

/// Convert raw JWK entries into decoding keys indexed by `kid`.
///
/// Entries without a `kid`, symmetric (`oct`) keys, encryption keys, and
/// anything `jsonwebtoken` cannot parse are skipped.
fn parse_keys(raw: Vec<serde_json::Value>) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::with_capacity(raw.len());

    for value in raw {
        let jwk: Jwk = match serde_json::from_value(value) {
            Ok(jwk) => jwk,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable JWK");
                continue;
            }
        };

        let Some(kid) = jwk.common.key_id.clone() else {
            continue;
        };
        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            continue;
        }
        if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
            continue;
        }

        match DecodingKey::from_jwk(&jwk) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(e) => debug!(kid = %kid, error = %e, "Skipping unusable JWK"),
        }
    }

    keys
}
