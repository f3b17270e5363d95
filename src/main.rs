//! Species Proxy Server
//!
//! Fronts the rate-limited LLM upstream with a rotating credential pool and
//! the token-protected data API with a cached bearer token

use anyhow::{Context, Result};
use speciesproxy::{create_router, AppConfig, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load server settings from environment (.env included)
    let settings = Settings::new().context("Failed to load server settings")?;

    // Initialize logging
    init_logging(&settings);

    // Load upstream configuration from JSON file or environment
    let app_config = AppConfig::load_default().context("Failed to load upstream configuration")?;
    info!(
        "📁 Upstream configuration loaded ({} credential(s))",
        app_config.llm.api_keys.len()
    );

    // Create router
    let app = create_router(settings.clone(), app_config).await?;

    // Start server
    let addr = settings.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🚀 {} started!", speciesproxy::version_info());
    info!("📝 Health check: http://{}/health", addr);
    info!("🔄 LLM endpoints: http://{}/llm, http://{}/llm/stream", addr, addr);
    info!("🔐 Data API proxy: http://{}/proxy/", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}

/// Initialize logging system
fn init_logging(settings: &Settings) {
    let log_level = settings.logging.level.clone();

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if settings.logging.format == "json" {
        // JSON format logs (production environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        // Human readable format (development environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging system initialized");
}
