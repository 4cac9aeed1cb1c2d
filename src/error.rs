//! Error types for the Cromwell proxy
//!
//! Two layers live here:
//!
//! - [`Error`] covers process-level failures (configuration, bind, serve).
//!   Nothing in the request path returns it.
//! - [`ProxyError`] is the request-scoped taxonomy. Every variant renders as a
//!   terminal `{"code", "description"}` JSON response and never escapes the
//!   request that produced it.

use std::io;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for process-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body returned for every locally generated error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. `invalid_token`)
    pub code: String,
    /// Human-readable description
    pub description: String,
}

/// Request-scoped failures, each mapped to exactly one HTTP response.
///
/// An upstream that answers with a non-2xx status is not an error of this
/// proxy; such responses are relayed verbatim and never become a `ProxyError`.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing/malformed header, invalid token, or key resolution failure.
    #[error("{code}: {description}")]
    Authentication {
        /// Error code
        code: &'static str,
        /// Description shown to the client
        description: String,
    },

    /// Valid token without any of the route's required permissions.
    #[error("missing {} permission", .required.join(", "))]
    Authorization {
        /// The permissions that would have satisfied the route, sorted
        required: Vec<String>,
    },

    /// No route rule matched the method and path.
    #[error("no route for {method} {path}")]
    RouteNotFound {
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// The upstream could not be reached or did not answer in time.
    #[error("upstream unavailable (timed out: {timed_out})")]
    UpstreamUnavailable {
        /// Whether the failure was a timeout (504) rather than a transport error (502)
        timed_out: bool,
    },

    /// A protected route was reached but no token validator is configured.
    #[error("proxy misconfigured: {0}")]
    Misconfigured(&'static str),
}

impl ProxyError {
    /// Create an authentication failure
    pub fn authentication(code: &'static str, description: impl Into<String>) -> Self {
        Self::Authentication {
            code,
            description: description.into(),
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } | Self::Authorization { .. } => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable { timed_out: true } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnavailable { timed_out: false } => StatusCode::BAD_GATEWAY,
            Self::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication { code, .. } => *code,
            Self::Authorization { .. } => "missing_permission",
            Self::RouteNotFound { .. } => "not_found",
            Self::UpstreamUnavailable { timed_out: true } => "upstream_timeout",
            Self::UpstreamUnavailable { timed_out: false } => "upstream_unavailable",
            Self::Misconfigured(_) => "internal_error",
        }
    }

    /// Description sent to the client. Never contains upstream addresses.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Authentication { description, .. } => description.clone(),
            Self::Authorization { .. } => self.to_string(),
            Self::RouteNotFound { .. } => "The requested resource was not found.".to_string(),
            Self::UpstreamUnavailable { timed_out: true } => {
                "The workflow server did not respond in time.".to_string()
            }
            Self::UpstreamUnavailable { timed_out: false } => {
                "The workflow server is unavailable.".to_string()
            }
            Self::Misconfigured(_) => "Internal server error.".to_string(),
        }
    }

    /// JSON body for this error
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            description: self.description(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.body())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
