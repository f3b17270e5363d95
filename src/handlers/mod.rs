//! HTTP handlers module
//!
//! Contains all HTTP endpoint handling logic

pub mod health;
pub mod llm;
pub mod proxy;

use crate::config::{AppConfig, Settings};
use crate::middleware::request_logging_middleware;
use crate::services::Gateway;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::warn;

/// Application state
#[derive(Debug)]
pub struct AppState {
    pub settings: Settings,
    pub config: AppConfig,
    pub gateway: Arc<Gateway>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, config: AppConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            settings,
            config,
            gateway,
            started_at: Instant::now(),
        }
    }
}

/// Create application router
pub async fn create_router(settings: Settings, config: AppConfig) -> Result<Router> {
    let gateway = Arc::new(Gateway::new(&config)?);
    Ok(router_with_state(Arc::new(AppState::new(settings, config, gateway))))
}

/// Build the router around an existing state
pub fn router_with_state(app_state: Arc<AppState>) -> Router {
    let max_request_size = app_state.settings.request.max_request_size;
    let cors = app_state
        .settings
        .security
        .cors_enabled
        .then(|| cors_layer(&app_state.settings));

    // Create routes
    let router = Router::new()
        .route("/", get(banner))
        .route("/llm", post(llm::handle_generate))
        .route("/llm/stream", post(llm::handle_stream))
        .route("/proxy/*path", any(proxy::handle_proxy))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size));

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    // Create middleware stack
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_logging_middleware));

    router.layer(middleware_stack)
}

/// CORS layer answering preflight requests for the configured origins
pub fn cors_layer(settings: &Settings) -> CorsLayer {
    let allow_origin = if settings.allows_any_origin() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = settings
            .security
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Plain-text route listing
pub async fn banner() -> String {
    format!(
        "{}\n\n\
         POST /llm           one-shot generation with credential rotation\n\
         POST /llm/stream    streaming generation with credential rotation\n\
         ANY  /proxy/*path   token-protected data API\n\
         GET  /health        service status\n\
         GET  /health/live   liveness probe\n",
        crate::version_info()
    )
}
