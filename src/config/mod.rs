//! Configuration management module
//!
//! Server settings come from the environment; upstream configuration comes
//! from a JSON file or the environment.

pub mod file;
pub mod settings;

pub use file::{AppConfig, LlmConfig, TokenApiConfig};
pub use settings::Settings;
