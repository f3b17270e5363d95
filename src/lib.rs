//! Species Proxy Library
//!
//! Multi-credential LLM gateway with a singleflight bearer token cache, plus
//! the streaming decoder and generation coordinators that consume it

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export common types
pub use config::{AppConfig, Settings};
pub use handlers::{create_router, AppState};
pub use services::{
    ChatStore, Gateway, GatewayError, GenerationCoordinator, LlmStream, MemoryChatStore,
    SpeciesEnricher, StreamDecoder, TokenCache,
};
pub use utils::error::{AppError, AppResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get version information
pub fn version_info() -> String {
    format!("{} v{} - {}", NAME, VERSION, DESCRIPTION)
}
