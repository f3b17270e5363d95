//! LLM gateway handlers
//!
//! Forwards provider-native generation requests through the credential pool

use crate::handlers::AppState;
use crate::services::decoder::{DONE_SENTINEL, EVENT_PREFIX};
use crate::utils::error::{insert_diagnostic_headers, AppError, AppResult};
use crate::utils::logging::create_payload_log_summary;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use futures::{stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Handle one-shot generation
///
/// POST /llm
///
/// Upstream status and body are returned verbatim with the retry diagnostics.
pub async fn handle_generate(State(state): State<Arc<AppState>>, body: Bytes) -> AppResult<Response> {
    let payload = parse_payload(&body)?;

    let reply = state
        .gateway
        .call_once(state.gateway.generate_path(), &payload)
        .await?;

    info!(
        "Generation finished with status {} after {} attempt(s)",
        reply.status, reply.diagnostics.attempts
    );

    let content_type = reply
        .content_type
        .unwrap_or_else(|| "application/json".to_string());
    let mut response = Response::builder()
        .status(upstream_status(reply.status))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(reply.body))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    insert_diagnostic_headers(response.headers_mut(), &reply.diagnostics);

    Ok(response)
}

/// Handle streaming generation
///
/// POST /llm/stream
///
/// The upstream event stream is relayed chunk by chunk; a successful stream is
/// closed with the end-of-stream sentinel line.
pub async fn handle_stream(State(state): State<Arc<AppState>>, body: Bytes) -> AppResult<Response> {
    let payload = parse_payload(&body)?;

    let handle = state
        .gateway
        .call_streaming(state.gateway.stream_path(), &payload)
        .await?;

    info!(
        "Stream opened with status {} after {} attempt(s)",
        handle.status, handle.diagnostics.attempts
    );

    let status = upstream_status(handle.status);
    let diagnostics = handle.diagnostics.clone();

    let mut response = if handle.is_success() {
        let done = Bytes::from(format!("{} {}\n\n", EVENT_PREFIX, DONE_SENTINEL));
        let events = handle.body.chain(stream::once(async move { Ok(done) }));

        let mut response = Response::new(Body::from_stream(events));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    } else {
        let content_type = handle
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());
        Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from_stream(handle.body))
            .map_err(|e| AppError::Internal(e.to_string()))?
    };
    *response.status_mut() = status;
    insert_diagnostic_headers(response.headers_mut(), &diagnostics);

    Ok(response)
}

fn parse_payload(body: &Bytes) -> AppResult<Value> {
    let payload: Value = serde_json::from_slice(body)?;
    if !payload.is_object() {
        return Err(AppError::Validation("Request body must be a JSON object".to_string()));
    }

    if let Ok(summary) = serde_json::to_string(&create_payload_log_summary(&payload)) {
        debug!("LLM request: {}", summary);
    }
    Ok(payload)
}

fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}
