//! Bearer token cache
//!
//! Time-boxed cache of the third-party API token. Concurrent misses are
//! collapsed into a single in-flight fetch (singleflight).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Token fetch failure
///
/// Cloneable so every caller joined on the same fetch receives the same error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("Token request failed: {0}")]
    Request(String),

    #[error("Token endpoint returned status {0}")]
    Status(u16),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Token endpoint returned an empty token")]
    EmptyToken,

    #[error("Token fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Token as returned by a fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedToken {
    pub value: String,
    /// When the token was issued; drives TTL expiry
    pub fetched_at: DateTime<Utc>,
}

/// Source of fresh tokens
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> Result<FetchedToken, TokenError>;
}

/// Fetches tokens from a renewer endpoint returning `{"token": .., "lastUpdated": ..}`
pub struct HttpTokenFetcher {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl HttpTokenFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("speciesproxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create token HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self) -> Result<FetchedToken, TokenError> {
        debug!("Fetching bearer token");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Status(status.as_u16()));
        }

        let payload: TokenPayload = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

        let value = payload
            .token
            .filter(|token| !token.trim().is_empty())
            .ok_or(TokenError::EmptyToken)?;

        let fetched_at = payload
            .last_updated
            .and_then(|stamp| DateTime::parse_from_rfc3339(&stamp).ok())
            .map(|stamp| stamp.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(FetchedToken { value, fetched_at })
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<String, TokenError>>>;

#[derive(Default)]
struct CacheState {
    cached: Option<FetchedToken>,
    in_flight: Option<SharedFetch>,
}

/// Singleflight bearer token cache
///
/// The mutex guards only the check-and-set of the cache slot and the in-flight
/// marker; it is never held across the network call.
pub struct TokenCache {
    fetcher: Arc<dyn TokenFetcher>,
    ttl: Duration,
    fetch_timeout: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            fetch_timeout,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return a fresh token, joining an in-flight fetch if there is one
    pub async fn get_token(&self) -> Result<String, TokenError> {
        let fetch = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if let Some(in_flight) = &state.in_flight {
                debug!("Joining in-flight token fetch");
                in_flight.clone()
            } else if let Some(token) = state.cached.as_ref().filter(|t| self.is_fresh(t)) {
                return Ok(token.value.clone());
            } else {
                let fetch = self.start_fetch();
                state.in_flight = Some(fetch.clone());
                fetch
            }
        };

        fetch.await
    }

    /// Token currently cached, fresh or not
    pub fn cached(&self) -> Option<FetchedToken> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cached
            .clone()
    }

    fn is_fresh(&self, token: &FetchedToken) -> bool {
        let age = Utc::now().signed_duration_since(token.fetched_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // Issued in the future relative to our clock
            Err(_) => true,
        }
    }

    fn start_fetch(&self) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        let timeout = self.fetch_timeout;

        async move {
            let result = match tokio::time::timeout(timeout, fetcher.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(TokenError::Timeout(timeout)),
            };

            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.in_flight = None;

            match result {
                Ok(token) => {
                    info!("Bearer token refreshed (issued {})", token.fetched_at.to_rfc3339());
                    let value = token.value.clone();
                    state.cached = Some(token);
                    Ok(value)
                }
                Err(e) => {
                    warn!("Bearer token fetch failed: {}", e);
                    Err(e)
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<FetchedToken, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedToken {
                value: format!("token-{}", n),
                fetched_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_cache_hit_after_first_fetch() {
        let fetcher = Arc::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = TokenCache::new(fetcher.clone(), Duration::from_secs(3600), Duration::from_secs(1));

        assert_eq!(cache.get_token().await.unwrap(), "token-0");
        assert_eq!(cache.get_token().await.unwrap(), "token-0");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached().unwrap().value, "token-0");
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refreshes() {
        let fetcher = Arc::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        });
        let cache = TokenCache::new(fetcher.clone(), Duration::ZERO, Duration::from_secs(1));

        assert_eq!(cache.get_token().await.unwrap(), "token-0");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
    }
}
