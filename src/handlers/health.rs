//! Health check handlers
//!
//! Provides application health status check endpoints

use crate::handlers::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version information
    pub version: String,
    /// Timestamp
    pub timestamp: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Check result
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    /// Configured upstream credentials
    pub credentials: usize,
    /// Token cache state: disabled, empty or cached
    pub token_cache: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

/// Basic health check
///
/// GET /health
///
/// Returns 503 when no upstream credential is configured.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    debug!("Executing health check");

    let credentials = state.gateway.pool().len();
    let token_cache = match state.gateway.token_cache() {
        None => "disabled",
        Some(cache) if cache.cached().is_some() => "cached",
        Some(_) => "empty",
    };

    let healthy = credentials > 0;
    let response = build_response(
        if healthy { "healthy" } else { "degraded" },
        Some(HealthDetails {
            credentials,
            token_cache: token_cache.to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
        }),
    );

    if healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

/// Liveness check
///
/// GET /health/live
///
/// Does not look at upstream state.
pub async fn liveness_check(State(_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing liveness check");
    Json(build_response("alive", None))
}

fn build_response(status: &str, details: Option<HealthDetails>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details,
    }
}
