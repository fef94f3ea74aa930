//! # Download Module
//!
//! Questo modulo scarica i byte grezzi degli asset (media base e overlay).
//!
//! ## Responsabilità:
//! - Trait `AssetFetcher`: un singolo tentativo di download (HTTP o fake nei test)
//! - `DownloadManager`: retry con backoff esponenziale sugli errori transitori
//! - Timeout per ogni tentativo, un worker non resta mai bloccato
//! - Classificazione errori: transitori (timeout, reset, 5xx, 429) vs
//!   permanenti (locator invalido, 4xx)
//!
//! ## Garanzie:
//! - I byte restano in memoria finché il download non è completo
//! - Nessun file parziale viene mai esposto agli stage successivi

use crate::config::Config;
use crate::error::{ArchiveError, ArchiveResult};
use crate::file_manager::FileManager;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A single download attempt
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> ArchiveResult<Vec<u8>>;
}

/// Plain HTTP GET fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> ArchiveResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("memory-kit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArchiveError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn classify(error: reqwest::Error) -> ArchiveError {
        if error.is_builder() || error.is_redirect() {
            ArchiveError::PermanentFetch(error.to_string())
        } else {
            // timeouts, refused/reset connections, truncated bodies
            ArchiveError::TransientFetch(error.to_string())
        }
    }

    fn classify_status(status: StatusCode) -> ArchiveError {
        let message = format!("HTTP {}", status);
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            ArchiveError::TransientFetch(message)
        } else {
            ArchiveError::PermanentFetch(message)
        }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> ArchiveResult<Vec<u8>> {
        let url = Url::parse(locator)
            .map_err(|e| ArchiveError::PermanentFetch(format!("invalid locator '{}': {}", locator, e)))?;

        let response = self.client.get(url).send().await.map_err(Self::classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let bytes = response.bytes().await.map_err(Self::classify)?;
        if bytes.is_empty() {
            return Err(ArchiveError::TransientFetch("empty response body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Attempt count and delay growth for downloads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            attempt_timeout: config.request_timeout(),
        }
    }

    /// Delay before retry number `retry` (1 = first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Fetches assets, retrying transient failures with backoff
#[derive(Clone)]
pub struct DownloadManager {
    fetcher: Arc<dyn AssetFetcher>,
    policy: RetryPolicy,
}

impl DownloadManager {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, policy: RetryPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub async fn fetch(&self, locator: &str) -> ArchiveResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.attempt_timeout, self.fetcher.fetch(locator)).await {
                Ok(result) => result,
                Err(_) => Err(ArchiveError::TransientFetch(format!(
                    "attempt timed out after {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            match result {
                Ok(bytes) => {
                    debug!("Fetched {} in {} attempt(s)", FileManager::format_size(bytes.len() as u64), attempt);
                    return Ok(bytes);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Download attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(ArchiveError::FetchFailed {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
