//! HTTP Fetcher
//!
//! Issues outbound requests for the gateway. Any HTTP status is a successful
//! fetch; only transport failures are errors, the same way a browser fetch
//! behaves.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

use super::errors::FetchError;
use super::types::{Request, Response};

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// Something that can perform a network round trip
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// A recent error entry for tracking
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub url: String,
    pub error: String,
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    http_client: Client,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    async fn send(&self, request: &Request) -> Result<Response, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let mut builder = self.http_client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, url: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            url: url.to_string(),
            error: error.to_string(),
        };

        let mut log = self.error_log.write().unwrap_or_else(|e| e.into_inner());
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Get connection health status string
    pub fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    /// Get recent errors
    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        debug!(method = %request.method, url = %request.url, "Fetching from network");

        match self.send(request).await {
            Ok(response) => {
                let health = if response.status == 429 || response.status >= 500 {
                    HEALTH_DEGRADED
                } else {
                    HEALTH_HEALTHY
                };
                self.health.store(health, Ordering::Relaxed);
                Ok(response)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed");
                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
                self.log_error(&request.url, &e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is closed in test environments
        let result = fetcher.fetch(&Request::get("http://127.0.0.1:9/")).await;

        assert!(result.is_err());
        assert_eq!(fetcher.health_status(), "unhealthy");
        assert_eq!(fetcher.recent_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_method_is_request_error() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        let result = fetcher
            .fetch(&Request::new("BAD METHOD", "http://127.0.0.1:9/"))
            .await;

        assert!(matches!(result, Err(FetchError::Request(_))));
    }
}
