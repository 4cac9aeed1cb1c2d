//! Shared fixtures: a fake identity provider, a fake workflow server, and
//! token minting with the keys under `tests/fixtures/`.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::compression::CompressionLayer;

use cromwell_proxy::{
    auth::AuthGate,
    config::{AuthConfig, Config, UpstreamConfig},
    gateway::{AppState, Forwarder, RouteTable, create_router},
};

pub const ISSUER: &str = "https://tenant.test/";
pub const AUDIENCE: &str = "cromwell-api";

pub const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/signing_key.pem");
pub const ROTATED_KEY: &[u8] = include_bytes!("../fixtures/rotated_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");
pub const JWKS_ROTATED: &str = include_str!("../fixtures/jwks_rotated.json");

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Claims for a token valid for the next hour
pub fn claims(permissions: &[&str]) -> Value {
    json!({
        "iss": ISSUER,
        "sub": "auth0|test-user",
        "aud": [AUDIENCE, "https://tenant.test/userinfo"],
        "iat": now(),
        "exp": now() + 3600,
        "permissions": permissions,
    })
}

/// Sign `claims` with RS256
pub fn sign(claims: &Value, kid: Option<&str>, pem: &[u8]) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(ToString::to_string);
    let key = EncodingKey::from_rsa_pem(pem).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// A valid token signed with the primary key
pub fn token(permissions: &[&str]) -> String {
    sign(&claims(permissions), Some("primary"), SIGNING_KEY)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Identity provider publishing a swappable JWKS document
#[derive(Clone)]
pub struct FakeIdp {
    pub jwks_uri: String,
    hits: Arc<AtomicUsize>,
    document: Arc<RwLock<Value>>,
}

impl FakeIdp {
    pub async fn start(document: &str) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let document = Arc::new(RwLock::new(serde_json::from_str(document).unwrap()));

        let state = (Arc::clone(&hits), Arc::clone(&document));
        let app = Router::new()
            .route("/.well-known/jwks.json", get(jwks_handler))
            .with_state(state);

        let base = spawn(app).await;
        Self {
            jwks_uri: format!("{base}/.well-known/jwks.json"),
            hits,
            document,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn publish(&self, document: &str) {
        *self.document.write() = serde_json::from_str(document).unwrap();
    }
}

async fn jwks_handler(
    State((hits, document)): State<(Arc<AtomicUsize>, Arc<RwLock<Value>>)>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let body = document.read().clone();
    Json(body)
}

/// A request as seen by the fake workflow server
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Workflow server that records every request it receives.
///
/// Responses by path:
/// - `/api/workflows/v1/{id}/abort`: `200 {"id": id, "status": "Aborting"}`
/// - `/api/workflows/v1/moved`: `302` with a `Location` header
/// - `/api/workflows/v1/missing`: `404` with a Cromwell-style body
/// - `/api/workflows/v1/big/logs`: 10 000 bytes of `x`
/// - `/api/workflows/v1/gzipped/logs`: [`LOG_TEXT`], gzip-encoded when the client accepts it
/// - `/api/workflows/v1/slow/status`: answers only after [`SLOW_RESPONSE`]
/// - anything else: `200` JSON echo of method, path and query
#[derive(Clone)]
pub struct FakeUpstream {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/workflows/v1/gzipped/logs",
                get(gzipped_logs).layer(CompressionLayer::new()),
            )
            .fallback(upstream_handler)
            .with_state(Arc::clone(&requests));

        Self {
            url: spawn(app).await,
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn last(&self) -> Recorded {
        self.requests.lock().last().cloned().unwrap()
    }
}

async fn upstream_handler(
    State(requests): State<Arc<Mutex<Vec<Recorded>>>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let path = parts.uri.path().to_string();

    requests.lock().push(Recorded {
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        headers: parts.headers.clone(),
        body: body.clone(),
    });

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "workflows", "v1", id, "abort"] => {
            Json(json!({"id": id, "status": "Aborting"})).into_response()
        }
        ["api", "workflows", "v1", "moved"] => (
            StatusCode::FOUND,
            [(header::LOCATION, "/api/workflows/v1/elsewhere")],
        )
            .into_response(),
        ["api", "workflows", "v1", "missing"] => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "fail", "message": "Unrecognized workflow ID"})),
        )
            .into_response(),
        ["api", "workflows", "v1", "slow", "status"] => {
            tokio::time::sleep(SLOW_RESPONSE).await;
            Json(json!({"id": "slow", "status": "Running"})).into_response()
        }
        ["api", "workflows", "v1", "big", "logs"] => (
            [
                (header::CONTENT_ENCODING, "identity"),
                (header::HeaderName::from_static("x-cromwell-log"), "yes"),
            ],
            vec![b'x'; 10_000],
        )
            .into_response(),
        _ => Json(json!({
            "method": parts.method.as_str(),
            "path": path,
            "query": parts.uri.query(),
            "body_len": body.len(),
        }))
        .into_response(),
    }
}

/// Workflow log served by the gzip route
pub const LOG_TEXT: &str = "2026-10-19 12:00:00 [INFO] call-align: job 17 running on shard 3\n";

/// How long the slow route stalls before answering
pub const SLOW_RESPONSE: Duration = Duration::from_secs(5);

async fn gzipped_logs(
    State(requests): State<Arc<Mutex<Vec<Recorded>>>>,
    headers: HeaderMap,
) -> String {
    requests.lock().push(Recorded {
        method: "GET".to_string(),
        uri: "/api/workflows/v1/gzipped/logs".to_string(),
        headers,
        body: Bytes::new(),
    });
    LOG_TEXT.repeat(200)
}

/// Configuration pointing at the fake servers
pub fn config(upstream: &str, jwks_uri: &str) -> Config {
    Config {
        upstream: UpstreamConfig {
            base_url: format!("{upstream}/"),
            ..UpstreamConfig::default()
        },
        auth: AuthConfig {
            issuer: Some(ISSUER.to_string()),
            audience: Some(AUDIENCE.to_string()),
            jwks_uri: Some(jwks_uri.to_string()),
            require_https: false,
            ..AuthConfig::default()
        },
        ..Config::default()
    }
}

/// The proxy's router, built the way the server builds it
pub fn proxy_app(config: &Config) -> Router {
    config.validate().unwrap();
    let state = AppState {
        routes: RouteTable::from_config(&config.effective_routes()).unwrap(),
        gate: Some(AuthGate::from_config(&config.auth).unwrap()),
        forwarder: Forwarder::new(&config.upstream).unwrap(),
    };
    create_router(Arc::new(state))
}

/// Fake IdP, fake upstream and a proxy wired to both
pub struct Harness {
    pub idp: FakeIdp,
    pub upstream: FakeUpstream,
    pub app: Router,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let idp = FakeIdp::start(JWKS).await;
        let upstream = FakeUpstream::start().await;
        let mut config = config(&upstream.url, &idp.jwks_uri);
        adjust(&mut config);
        let app = proxy_app(&config);
        Self { idp, upstream, app }
    }

    pub async fn send(&self, request: axum::http::Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, authorization: Option<&str>) -> Response {
        let mut builder = axum::http::Request::builder().method("GET").uri(uri);
        if let Some(auth) = authorization {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

/// Drain a response body
pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Short pause for tests that depend on cache age
pub async fn pause(duration: Duration) {
    tokio::time::sleep(duration).await;
}
