//! Cromwell Proxy Library
//!
//! Authenticating reverse proxy that sits in front of a Cromwell workflow
//! server and admits only requests carrying a valid bearer token with the
//! permissions the route requires.
//!
//! # Request path
//!
//! 1. **Route matching**: the first rule matching method and path decides the
//!    upstream path and the permissions required ([`gateway::routes`]).
//! 2. **Auth gate**: `Authorization: Bearer` extraction, JWT validation
//!    against the identity provider's JWKS, any-of permission check ([`auth`]).
//! 3. **Forwarding**: the request is relayed unchanged (minus `Host`) and the
//!    response streamed back in bounded chunks ([`gateway::forward`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, ProxyError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let initialized = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    initialized.map_err(|e| Error::Internal(format!("Failed to initialize logging: {e}")))
}
