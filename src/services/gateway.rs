//! Multi-credential LLM gateway
//!
//! Fronts the rate-limited LLM upstream with a rotating credential pool and
//! the token-protected data API with the bearer token cache.

use crate::config::AppConfig;
use crate::models::gemini::GeminiRequest;
use crate::services::credentials::CredentialPool;
use crate::services::lines::EventLines;
use crate::services::token_cache::{HttpTokenFetcher, TokenCache};
use anyhow::Context;
use async_trait::async_trait;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Header carrying the number of upstream attempts
pub const HEADER_ATTEMPT_COUNT: &str = "x-gateway-attempt-count";
/// Header carrying the comma-separated indices of rotated-away credentials
pub const HEADER_FAILED_CREDENTIALS: &str = "x-gateway-failed-credentials";
/// Header carrying the index of the credential that succeeded, or `none`
pub const HEADER_SUCCESS_CREDENTIAL: &str = "x-gateway-success-credential";
/// Header set to `true` when every credential failed
pub const HEADER_ALL_FAILED: &str = "x-gateway-all-failed";
/// Header telling whether the proxy attached a bearer token
pub const HEADER_TOKEN_SOURCE: &str = "x-token-source";

const CREDENTIAL_HEADER: &str = "x-goog-api-key";
const USER_AGENT: &str = concat!("speciesproxy/", env!("CARGO_PKG_VERSION"));

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No upstream credentials configured")]
    NoCredentials,

    #[error(
        "All credentials failed after {} attempts: {}",
        .0.attempts,
        .0.last_error.as_deref().unwrap_or("unknown error")
    )]
    Exhausted(RetryDiagnostics),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Retry bookkeeping of one gateway call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryDiagnostics {
    /// Upstream requests issued
    pub attempts: usize,
    /// Credentials rotated away from (429 or transport failure), in order
    pub failed_credentials: Vec<usize>,
    /// Credential whose response was 2xx
    pub success_credential: Option<usize>,
    /// Last retryable failure seen
    pub last_error: Option<String>,
}

impl RetryDiagnostics {
    /// Diagnostic response headers
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let failed = self
            .failed_credentials
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let success = self
            .success_credential
            .map(|index| index.to_string())
            .unwrap_or_else(|| "none".to_string());

        vec![
            (HEADER_ATTEMPT_COUNT, self.attempts.to_string()),
            (HEADER_FAILED_CREDENTIALS, failed),
            (HEADER_SUCCESS_CREDENTIAL, success),
        ]
    }

    /// Parse diagnostics back from response headers
    pub fn from_headers<'a, F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        Self {
            attempts: get(HEADER_ATTEMPT_COUNT)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(0),
            failed_credentials: get(HEADER_FAILED_CREDENTIALS)
                .map(|value| {
                    value
                        .split(',')
                        .filter_map(|index| index.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default(),
            success_credential: get(HEADER_SUCCESS_CREDENTIAL).and_then(|value| value.trim().parse().ok()),
            last_error: None,
        }
    }
}

/// Raw upstream byte stream
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Verbatim upstream response of a one-shot call
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub diagnostics: RetryDiagnostics,
}

/// Upstream stream accepted by a credential
pub struct StreamHandle {
    pub status: u16,
    pub content_type: Option<String>,
    pub diagnostics: RetryDiagnostics,
    pub body: ByteStream,
}

impl StreamHandle {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Split the body into event lines
    pub fn lines(self) -> EventLines<ByteStream> {
        EventLines::new(self.body)
    }

    /// Drain the body into a string; used for non-2xx streams
    pub async fn text(self) -> String {
        let mut body = self.body;
        let mut buffer = Vec::new();
        while let Some(Ok(chunk)) = body.next().await {
            buffer.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

/// Request forwarded to the token-protected API
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    pub method: String,
    /// Path below the proxy prefix, e.g. `/v1/taxa`
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Verbatim response of the token-protected API
#[derive(Debug)]
pub struct ProxyReply {
    pub status: u16,
    pub body: Bytes,
    /// Whether a bearer token was attached
    pub token_attached: bool,
}

/// LLM + data API gateway
pub struct Gateway {
    client: Client,
    stream_client: Client,
    stream_start_timeout: Duration,
    proxy_client: Client,
    pool: CredentialPool,
    llm_base_url: String,
    generate_path: String,
    stream_path: String,
    proxy_base_url: String,
    token_cache: Option<Arc<TokenCache>>,
}

impl Gateway {
    /// Build the gateway from upstream configuration
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        // No total timeout: an accepted stream runs as long as the upstream sends
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.llm.timeout))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create streaming HTTP client")?;

        let proxy_client = Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create proxy HTTP client")?;

        let token_cache = match &config.token_api.token_url {
            Some(url) => {
                let fetch_timeout = Duration::from_secs(config.token_api.timeout_secs);
                let fetcher = HttpTokenFetcher::new(url.clone(), fetch_timeout)?;
                Some(Arc::new(TokenCache::new(
                    Arc::new(fetcher),
                    Duration::from_secs(config.token_api.ttl_hours.saturating_mul(3600)),
                    fetch_timeout,
                )))
            }
            None => None,
        };

        let pool = CredentialPool::new(config.llm.api_keys.iter().cloned());
        info!(
            "Gateway ready: {} credential(s), token cache {}",
            pool.len(),
            if token_cache.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            client,
            stream_client,
            stream_start_timeout: Duration::from_secs(config.llm.stream_timeout),
            proxy_client,
            pool,
            llm_base_url: config.llm.base_url.clone(),
            generate_path: config.llm.generate_path.clone(),
            stream_path: config.llm.stream_path.clone(),
            proxy_base_url: config.token_api.base_url.clone(),
            token_cache,
        })
    }

    /// Replace the token cache
    pub fn with_token_cache(mut self, token_cache: Option<Arc<TokenCache>>) -> Self {
        self.token_cache = token_cache;
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn token_cache(&self) -> Option<&Arc<TokenCache>> {
        self.token_cache.as_ref()
    }

    /// Configured one-shot upstream path
    pub fn generate_path(&self) -> &str {
        &self.generate_path
    }

    /// Configured streaming upstream path
    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    /// Single non-streaming call with credential rotation
    pub async fn call_once(&self, path: &str, payload: &Value) -> Result<UpstreamReply, GatewayError> {
        let url = join_url(&self.llm_base_url, path);
        let (response, diagnostics) = self.send_with_rotation(&self.client, &url, payload, None).await?;

        let status = response.status().as_u16();
        let content_type = content_type(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!("Upstream call completed with status {} ({} bytes)", status, body.len());
        Ok(UpstreamReply {
            status,
            content_type,
            body,
            diagnostics,
        })
    }

    /// Streaming call with credential rotation
    ///
    /// Rotation ends once a credential's response has started; later failures
    /// surface through the body stream as [`GatewayError::Stream`].
    pub async fn call_streaming(&self, path: &str, payload: &Value) -> Result<StreamHandle, GatewayError> {
        let url = join_url(&self.llm_base_url, path);
        let (response, diagnostics) = self
            .send_with_rotation(&self.stream_client, &url, payload, Some(self.stream_start_timeout))
            .await?;

        let status = response.status().as_u16();
        let content_type = content_type(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GatewayError::Stream(e.to_string())))
            .boxed();

        debug!("Upstream stream opened with status {}", status);
        Ok(StreamHandle {
            status,
            content_type,
            diagnostics,
            body,
        })
    }

    /// Forward a request to the token-protected API
    ///
    /// A token fetch failure degrades to an unauthenticated request.
    pub async fn proxy(&self, request: ProxyRequest) -> Result<ProxyReply, GatewayError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| GatewayError::InvalidRequest(format!("Unsupported method: {}", request.method)))?;

        let mut url = join_url(&self.proxy_base_url, &request.path);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let token = match &self.token_cache {
            Some(cache) => match cache.get_token().await {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!("Bearer token unavailable, forwarding without it: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut builder = self
            .proxy_client
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        if let Some(token) = &token {
            builder = builder.bearer_auth(token);
        }
        if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
            if let Some(content_type) = &request.content_type {
                builder = builder.header("Content-Type", content_type);
            }
            builder = builder.body(request.body);
        }

        debug!("Proxying {} {} (token: {})", method, request.path, token.is_some());
        let response = builder.send().await.map_err(|e| {
            error!("Proxy request failed: {}", e);
            GatewayError::Transport(e.to_string())
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(ProxyReply {
            status,
            body,
            token_attached: token.is_some(),
        })
    }

    /// POST `payload` once per credential until a non-retryable response
    ///
    /// `start_timeout` bounds the wait for response headers; running out
    /// counts as a transport failure.
    async fn send_with_rotation(
        &self,
        client: &Client,
        url: &str,
        payload: &Value,
        start_timeout: Option<Duration>,
    ) -> Result<(reqwest::Response, RetryDiagnostics), GatewayError> {
        if self.pool.is_empty() {
            error!("Gateway call rejected: credential pool is empty");
            return Err(GatewayError::NoCredentials);
        }

        let mut diagnostics = RetryDiagnostics::default();

        for (index, key) in self.pool.rotation() {
            diagnostics.attempts += 1;
            debug!("Upstream attempt {} with credential #{}", diagnostics.attempts, index);

            let request = client.post(url).header(CREDENTIAL_HEADER, key).json(payload).send();
            let result = match start_timeout {
                Some(limit) => match tokio::time::timeout(limit, request).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("no response within {}s", limit.as_secs())),
                },
                None => request.await.map_err(|e| e.to_string()),
            };

            match result {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Credential #{} rate limited, rotating", index);
                    diagnostics.failed_credentials.push(index);
                    diagnostics.last_error = Some(
                        response
                            .text()
                            .await
                            .unwrap_or_else(|_| "429 Too Many Requests".to_string()),
                    );
                }
                Ok(response) => {
                    if response.status().is_success() {
                        diagnostics.success_credential = Some(index);
                    } else {
                        warn!(
                            "Upstream returned {} on credential #{}, not retrying",
                            response.status(),
                            index
                        );
                    }
                    return Ok((response, diagnostics));
                }
                Err(e) => {
                    warn!("Credential #{} transport failure, rotating: {}", index, e);
                    diagnostics.failed_credentials.push(index);
                    diagnostics.last_error = Some(e);
                }
            }
        }

        error!(
            "All {} credentials failed (attempts: {})",
            self.pool.len(),
            diagnostics.attempts
        );
        Err(GatewayError::Exhausted(diagnostics))
    }
}

/// Source of streaming generations
///
/// Implemented in-process by [`Gateway`] and over HTTP by
/// [`RemoteGateway`](crate::services::remote::RemoteGateway).
#[async_trait]
pub trait LlmStream: Send + Sync {
    async fn open_stream(&self, request: &GeminiRequest) -> Result<StreamHandle, GatewayError>;
}

#[async_trait]
impl LlmStream for Gateway {
    async fn open_stream(&self, request: &GeminiRequest) -> Result<StreamHandle, GatewayError> {
        let payload = serde_json::to_value(request).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        self.call_streaming(&self.stream_path, &payload).await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("pool", &self.pool)
            .field("llm_base_url", &self.llm_base_url)
            .field("proxy_base_url", &self.proxy_base_url)
            .field("token_cache", &self.token_cache.is_some())
            .finish()
    }
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
