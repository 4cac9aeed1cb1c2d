//! Upstream forwarding.
//!
//! Requests are relayed with their method, headers (minus `Host`), query and
//! body. Redirects are not followed. Response bodies are streamed back in
//! bounded chunks and never buffered whole, so workflow logs and outputs of
//! any size pass through.

use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::redirect::Policy;
use tracing::{debug, error, instrument, warn};

use crate::Result;
use crate::auth::Claims;
use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Response headers that describe the upstream connection or framing rather
/// than the resource. The body is re-chunked, so these no longer apply.
static EXCLUDED_RESPONSE_HEADERS: [header::HeaderName; 4] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// An upstream answer being relayed to the client.
pub struct UpstreamResponse {
    /// Upstream status, relayed unchanged
    pub status: StatusCode,
    /// Filtered upstream headers
    pub headers: HeaderMap,
    /// Streaming body
    pub body: Body,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Relays requests to the configured workflow server
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
}

impl Forwarder {
    /// Build a forwarder. Fails only if the HTTP client cannot be constructed.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Upstream URL for `path` and the raw `query` string.
    #[must_use]
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if let Some(q) = query {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Forward one request and return the upstream response.
    ///
    /// Any status the upstream returns is a successful forward. Only failing
    /// to get a response at all is an error.
    #[instrument(
        name = "forward",
        skip(self, headers, body, claims),
        fields(subject = claims.and_then(|c| c.subject.as_deref()).unwrap_or("-"))
    )]
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Body,
        claims: Option<&Claims>,
    ) -> std::result::Result<UpstreamResponse, ProxyError> {
        let url = self.upstream_url(path, query);

        let mut outgoing = headers.clone();
        outgoing.remove(header::HOST);

        let mut request = self.client.request(method, &url).headers(outgoing);
        if body.size_hint().exact() != Some(0) {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = request.send().await.map_err(|e| {
            // Logged for operators only; the client never sees the address
            error!(url = %url, error = %e, "Upstream request failed");
            ProxyError::UpstreamUnavailable {
                timed_out: e.is_timeout(),
            }
        })?;

        let status = upstream.status();
        debug!(status = status.as_u16(), "Upstream responded");

        let mut headers = upstream.headers().clone();
        for name in &EXCLUDED_RESPONSE_HEADERS {
            headers.remove(name);
        }

        let stream = upstream.bytes_stream().inspect_err(|e| {
            warn!(error = %e, "Upstream body stream interrupted");
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: Body::from_stream(rechunk(stream, self.chunk_size)),
        })
    }
}

/// Split every chunk of `stream` into pieces of at most `chunk_size` bytes.
fn rechunk<S, E>(stream: S, chunk_size: usize) -> impl Stream<Item = std::result::Result<Bytes, E>>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
{
    async_stream::try_stream! {
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let mut chunk = chunk?;
            while chunk.len() > chunk_size {
                yield chunk.split_to(chunk_size);
            }
            if !chunk.is_empty() {
                yield chunk;
            }
        }
    }
}
