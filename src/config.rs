//! Configuration management
//!
//! Values are layered with `figment`: built-in defaults, then an optional YAML
//! file, then `CROMWELL_PROXY_*` environment variables (`__` separates nested
//! keys, e.g. `CROMWELL_PROXY_AUTH__DOMAIN`). CLI flags are applied last by
//! the binary.

use std::{path::Path, str::FromStr, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gateway::routes::{RouteTable, cromwell_routes};
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "CROMWELL_PROXY_";

/// Prefixed variables read by the command line, not by the config layers
const CLI_ONLY_KEYS: &[&str] = &[
    "config",
    "port",
    "host",
    "upstream_url",
    "log_level",
    "log_format",
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Workflow server the proxy forwards to
    pub upstream: UpstreamConfig,
    /// Token validation configuration
    pub auth: AuthConfig,
    /// Ordered route rules. Empty means the built-in Cromwell table.
    pub routes: Vec<RouteConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// How long in-flight requests may drain after a shutdown signal
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Upstream (workflow server) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the workflow server, e.g. `http://cromwell:8000`
    pub base_url: String,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Maximum idle time between reads from the upstream.
    /// Not a whole-request deadline, so long streamed bodies are not cut off.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Upper bound on the size of each body chunk relayed to the client
    pub chunk_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(300),
            chunk_size: 1024,
        }
    }
}

/// Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity-provider domain, e.g. `tenant.auth0.com`
    pub domain: Option<String>,
    /// Expected `aud` value
    pub audience: Option<String>,
    /// Expected `iss` value (default: `https://{domain}/`)
    pub issuer: Option<String>,
    /// Allowed signature algorithms
    pub algorithms: Vec<String>,
    /// Key set location (default: `https://{domain}/.well-known/jwks.json`)
    pub jwks_uri: Option<String>,
    /// How long a fetched key set is reused
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Minimum age of the cached key set before an unknown `kid` may trigger a refetch.
    ///
    /// Inside this window a token signed with a key the cache has not seen is
    /// rejected without asking the identity provider, which stops forged `kid`
    /// values from turning into a fetch per request. The cost is that a freshly
    /// rotated key is refused for up to this long after the last fetch. Set it
    /// to `0s` around a key rotation to refetch on every miss.
    #[serde(with = "humantime_serde")]
    pub jwks_refresh_cooldown: Duration,
    /// Timeout for a single key set fetch
    #[serde(with = "humantime_serde")]
    pub jwks_timeout: Duration,
    /// Refuse to fetch keys over plain HTTP
    pub require_https: bool,
    /// Clock-skew allowance applied to `exp` and `nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Claim carrying the permission list
    pub permissions_claim: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: None,
            audience: None,
            issuer: None,
            algorithms: vec!["RS256".to_string()],
            jwks_uri: None,
            jwks_ttl: Duration::from_secs(600),
            jwks_refresh_cooldown: Duration::from_secs(10),
            jwks_timeout: Duration::from_secs(10),
            require_https: true,
            leeway: Duration::from_secs(60),
            permissions_claim: "permissions".to_string(),
        }
    }
}

impl AuthConfig {
    fn domain(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .map(|d| d.trim_end_matches('/'))
            .filter(|d| !d.is_empty())
    }

    /// Expected issuer: explicit value, or `https://{domain}/`
    #[must_use]
    pub fn expected_issuer(&self) -> Option<String> {
        self.issuer
            .clone()
            .or_else(|| self.domain().map(|d| format!("https://{d}/")))
    }

    /// Key set URL: explicit value, or the well-known path under the domain
    #[must_use]
    pub fn jwks_url(&self) -> Option<String> {
        self.jwks_uri
            .clone()
            .or_else(|| self.domain().map(|d| format!("https://{d}/.well-known/jwks.json")))
    }

    /// Parse the algorithm allow-list.
    ///
    /// Symmetric algorithms are rejected: keys come from a published key set,
    /// so an HMAC entry would let anyone holding the public material sign.
    pub fn allowed_algorithms(&self) -> Result<Vec<Algorithm>> {
        if self.algorithms.is_empty() {
            return Err(Error::Config("auth.algorithms must not be empty".to_string()));
        }
        self.algorithms
            .iter()
            .map(|name| {
                let alg = Algorithm::from_str(name.trim()).map_err(|_| {
                    Error::Config(format!("Unknown signature algorithm: {name}"))
                })?;
                if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    return Err(Error::Config(format!(
                        "Symmetric algorithm {name} cannot be verified against a public key set"
                    )));
                }
                Ok(alg)
            })
            .collect()
    }
}

/// One route rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Methods this rule answers (empty = any method)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Path template: literal segments, `{name}`, and a trailing `{*name}`
    pub path: String,
    /// Upstream path template (default: the request path unchanged)
    #[serde(default)]
    pub upstream: Option<String>,
    /// Whether a bearer token is required
    #[serde(default = "default_true")]
    pub auth: bool,
    /// Any-of permission set; empty means any valid token
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RouteConfig {
    /// Protected route requiring any of `permissions`
    pub fn protected(methods: &[&str], path: &str, permissions: &[&str]) -> Self {
        Self {
            methods: methods.iter().map(ToString::to_string).collect(),
            path: path.to_string(),
            upstream: None,
            auth: true,
            permissions: permissions.iter().map(ToString::to_string).collect(),
        }
    }

    /// Route that skips authentication entirely
    pub fn public(methods: &[&str], path: &str) -> Self {
        Self {
            auth: false,
            ..Self::protected(methods, path, &[])
        }
    }

    /// Set the upstream path template
    #[must_use]
    pub fn with_upstream(mut self, upstream: &str) -> Self {
        self.upstream = Some(upstream.to_string());
        self
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(env_path) => tracing::debug!("Loaded env file: {}", env_path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Failed to load .env file: {e}"),
        }

        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(CLI_ONLY_KEYS).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Route rules in effect: configured ones, or the built-in Cromwell table
    #[must_use]
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if self.routes.is_empty() {
            cromwell_routes()
        } else {
            self.routes.clone()
        }
    }

    /// Whether any effective route requires a token
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.effective_routes().iter().any(|r| r.auth)
    }

    /// Check the configuration for values that would fail at request time.
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.upstream.base_url).map_err(|e| {
            Error::Config(format!("Invalid upstream.base_url {:?}: {e}", self.upstream.base_url))
        })?;
        if !matches!(base.scheme(), "http" | "https") || !base.has_host() {
            return Err(Error::Config(format!(
                "upstream.base_url must be an absolute http(s) URL, got {:?}",
                self.upstream.base_url
            )));
        }
        if self.upstream.chunk_size == 0 {
            return Err(Error::Config("upstream.chunk_size must be positive".to_string()));
        }

        self.auth.allowed_algorithms()?;

        if self.requires_auth() {
            if self.auth.jwks_url().is_none() || self.auth.expected_issuer().is_none() {
                return Err(Error::Config(
                    "auth.domain (or auth.jwks_uri and auth.issuer) is required when routes require authentication"
                        .to_string(),
                ));
            }
            if self.auth.audience.as_deref().is_none_or(str::is_empty) {
                return Err(Error::Config(
                    "auth.audience is required when routes require authentication".to_string(),
                ));
            }
        }

        RouteTable::from_config(&self.effective_routes())?;
        Ok(())
    }
}

/// Human-readable durations for serde (`"30s"`, `"5m"`, `"100ms"`, or bare seconds)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    /// Serialize Duration to a human-readable string (e.g. "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(s.trim()).map_err(serde::de::Error::custom),
        }
    }

    fn parse(s: &str) -> Result<Duration, String> {
        let invalid = |e: std::num::ParseIntError| format!("invalid duration {s:?}: {e}");

        // "ms" must be checked before "m" and "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(invalid)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(invalid)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(invalid)
        } else {
            s.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        }
    }
}
