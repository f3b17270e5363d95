//! HTTP client of a deployed gateway's streaming endpoint

use crate::models::gemini::GeminiRequest;
use crate::services::gateway::{
    join_url, GatewayError, LlmStream, RetryDiagnostics, StreamHandle, HEADER_ALL_FAILED,
};
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Streams generations through `POST {base_url}/llm/stream`
pub struct RemoteGateway {
    client: Client,
    base_url: String,
}

impl RemoteGateway {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("speciesproxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create remote gateway HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl LlmStream for RemoteGateway {
    async fn open_stream(&self, request: &GeminiRequest) -> Result<StreamHandle, GatewayError> {
        let url = join_url(&self.base_url, "llm/stream");
        debug!("Opening remote stream at {}", url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let headers = response.headers();
        let mut diagnostics =
            RetryDiagnostics::from_headers(|name| headers.get(name).and_then(|value| value.to_str().ok()));
        let all_failed = headers
            .get(HEADER_ALL_FAILED)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.eq_ignore_ascii_case("true"));

        let status = response.status().as_u16();
        if all_failed {
            diagnostics.last_error = response.text().await.ok();
            warn!("Remote gateway exhausted its credentials");
            return Err(GatewayError::Exhausted(diagnostics));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GatewayError::Stream(e.to_string())))
            .boxed();

        Ok(StreamHandle {
            status,
            content_type,
            diagnostics,
            body,
        })
    }
}
