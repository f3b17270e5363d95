//! Data API proxy handler
//!
//! Forwards `/proxy/*` to the token-protected upstream with the cached bearer
//! token attached when one is available

use crate::handlers::AppState;
use crate::services::gateway::{GatewayError, ProxyRequest, HEADER_TOKEN_SOURCE};
use crate::utils::error::{AppError, AppResult};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle proxied requests
///
/// ANY /proxy/*path
pub async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let request = ProxyRequest {
        method: method.to_string(),
        path: format!("/{}", path.trim_start_matches('/')),
        query: uri.query().map(str::to_string),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    };
    debug!("Proxy request: {} {}", request.method, request.path);

    let reply = state.gateway.proxy(request).await.map_err(|e| match e {
        GatewayError::Transport(message) => {
            warn!("Data API unreachable: {}", message);
            AppError::Proxy(message)
        }
        other => AppError::from(other),
    })?;

    Response::builder()
        .status(StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY))
        .header(header::CONTENT_TYPE, "application/json")
        .header(HEADER_TOKEN_SOURCE, token_source(reply.token_attached))
        .body(Body::from(reply.body))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `X-Token-Source` value
pub fn token_source(token_attached: bool) -> &'static str {
    if token_attached {
        "cache"
    } else {
        "none"
    }
}
