//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};

use super::forward::Forwarder;
use super::routes::RouteTable;
use crate::auth::{AuthDecision, AuthGate};
use crate::error::ProxyError;

/// Shared application state
pub struct AppState {
    /// Compiled route rules
    pub routes: RouteTable,
    /// Token gate; `None` when no route requires authentication
    pub gate: Option<AuthGate>,
    /// Upstream client
    pub forwarder: Forwarder,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .fallback(proxy_handler)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every non-local request: match, gate, forward.
async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match proxy(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn proxy(state: &AppState, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path();

    let Some(matched) = state.routes.match_route(&parts.method, path) else {
        debug!(method = %parts.method, path, "No route matched");
        return Err(ProxyError::RouteNotFound {
            method: parts.method.to_string(),
            path: path.to_string(),
        });
    };

    let claims = if matched.rule.auth_required() {
        let gate = state
            .gate
            .as_ref()
            .ok_or(ProxyError::Misconfigured("protected route without token validation"))?;

        match gate.check(&parts.headers, matched.rule.permissions()).await {
            AuthDecision::Authorized(claims) => Some(claims),
            AuthDecision::Denied(err) => {
                warn!(
                    method = %parts.method,
                    path,
                    code = err.code(),
                    "Request denied"
                );
                return Err(err);
            }
        }
    } else {
        None
    };

    let response = state
        .forwarder
        .forward(
            parts.method.clone(),
            &matched.upstream_path,
            parts.uri.query(),
            &parts.headers,
            body,
            claims.as_ref(),
        )
        .await?;

    Ok(response.into_response())
}
