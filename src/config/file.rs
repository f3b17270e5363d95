//! Upstream configuration
//!
//! Loads credentials, upstream URLs and token cache settings from a JSON file,
//! falling back to environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Numbered credential variables, read in order after `LLM_API_KEYS`
const NUMBERED_KEY_VARS: [&str; 5] = [
    "GEMINI_API_KEY",
    "GEMINI_API_KEY_2",
    "GEMINI_API_KEY_3",
    "GEMINI_API_KEY_4",
    "GEMINI_API_KEY_5",
];

/// LLM upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Upstream base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Path of the one-shot generation endpoint
    #[serde(default = "default_generate_path")]
    pub generate_path: String,

    /// Path of the streaming generation endpoint
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Interchangeable API keys, tried in rotation
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds to wait for a streaming response to start
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: u64,
}

/// Token-protected data API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenApiConfig {
    /// Base URL requests under `/proxy` are forwarded to
    #[serde(default = "default_proxy_base_url")]
    pub base_url: String,

    /// Bearer token endpoint; without it no token is attached
    #[serde(default)]
    pub token_url: Option<String>,

    /// Token lifetime in hours
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Token fetch timeout in seconds
    #[serde(default = "default_token_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_generate_path() -> String {
    "models/gemini-2.5-flash:generateContent".to_string()
}

fn default_stream_path() -> String {
    "models/gemini-2.5-flash:streamGenerateContent?alt=sse".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Longest accepted token TTL (one year)
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;

fn default_stream_timeout() -> u64 {
    300
}

fn default_proxy_base_url() -> String {
    "https://api.inaturalist.org".to_string()
}

fn default_ttl_hours() -> u64 {
    20
}

fn default_token_timeout() -> u64 {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            generate_path: default_generate_path(),
            stream_path: default_stream_path(),
            api_keys: Vec::new(),
            timeout: default_timeout(),
            stream_timeout: default_stream_timeout(),
        }
    }
}

impl Default for TokenApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_proxy_base_url(),
            token_url: None,
            ttl_hours: default_ttl_hours(),
            timeout_secs: default_token_timeout(),
        }
    }
}

/// Upstream configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// LLM upstream
    #[serde(default)]
    pub llm: LlmConfig,

    /// Token-protected data API
    #[serde(default)]
    pub token_api: TokenApiConfig,
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Credentials missing from the file are taken from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration from JSON file with an explicit variable source
    pub fn load_with<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        info!("Loading configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: AppConfig = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config JSON")?;

        if config.llm.api_keys.iter().all(|key| key.trim().is_empty()) {
            config.llm.api_keys = credentials_from(&lookup);
        }

        config.validate()?;

        debug!("Loaded {} credential(s)", config.llm.api_keys.len());
        Ok(config)
    }

    /// Load configuration from default locations
    /// Searches in order:
    /// 1. ~/.config/speciesproxy/speciesproxy.json
    /// 2. ./speciesproxy.json
    ///
    /// Falls back to environment variables when no file exists.
    pub fn load_default() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("speciesproxy").join("speciesproxy.json");
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        let local_path = Path::new("speciesproxy.json");
        if local_path.exists() {
            return Self::load(local_path);
        }

        info!("No configuration file found, using environment variables");
        Self::from_env()
    }

    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: String| lookup(key).unwrap_or(default);
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid value for {}: {}", key, value)),
                None => Ok(default),
            }
        };

        let config = Self {
            llm: LlmConfig {
                base_url: get("LLM_BASE_URL", default_llm_base_url()),
                generate_path: get("LLM_GENERATE_PATH", default_generate_path()),
                stream_path: get("LLM_STREAM_PATH", default_stream_path()),
                api_keys: credentials_from(&lookup),
                timeout: number("LLM_TIMEOUT", default_timeout())?,
                stream_timeout: number("LLM_STREAM_TIMEOUT", default_stream_timeout())?,
            },
            token_api: TokenApiConfig {
                base_url: get("PROXY_BASE_URL", default_proxy_base_url()),
                token_url: lookup("TOKEN_URL").filter(|url| !url.trim().is_empty()),
                ttl_hours: number("TOKEN_TTL_HOURS", default_ttl_hours())?,
                timeout_secs: number("TOKEN_TIMEOUT_SECS", default_token_timeout())?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_keys.iter().all(|key| key.trim().is_empty()) {
            anyhow::bail!(
                "No LLM credentials configured. Set LLM_API_KEYS or GEMINI_API_KEY, \
                 or list apiKeys under llm in the configuration file"
            );
        }

        if !self.llm.base_url.starts_with("http") {
            anyhow::bail!("Invalid LLM base URL: {}", self.llm.base_url);
        }

        if !self.token_api.base_url.starts_with("http") {
            anyhow::bail!("Invalid proxy base URL: {}", self.token_api.base_url);
        }

        if let Some(url) = &self.token_api.token_url {
            if !url.starts_with("http") {
                anyhow::bail!("Invalid token URL: {}", url);
            }
        }

        if self.llm.timeout == 0 || self.llm.stream_timeout == 0 || self.token_api.timeout_secs == 0 {
            anyhow::bail!("Timeout values cannot be 0");
        }

        if self.token_api.ttl_hours == 0 {
            anyhow::bail!("Token TTL cannot be 0");
        }

        if self.token_api.ttl_hours > MAX_TOKEN_TTL_HOURS {
            anyhow::bail!(
                "Token TTL of {} hours exceeds the maximum of {}",
                self.token_api.ttl_hours,
                MAX_TOKEN_TTL_HOURS
            );
        }

        Ok(())
    }
}

/// Credentials from `LLM_API_KEYS` (comma-separated) then the numbered variables
///
/// Blank entries and duplicates are dropped; order is preserved.
pub fn credentials_from<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let listed = lookup("LLM_API_KEYS")
        .map(|keys| keys.split(',').map(|key| key.trim().to_string()).collect::<Vec<_>>())
        .unwrap_or_default();
    let numbered = NUMBERED_KEY_VARS
        .iter()
        .filter_map(|var| lookup(*var))
        .map(|key| key.trim().to_string());

    let mut keys: Vec<String> = Vec::new();
    for key in listed.into_iter().chain(numbered) {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
