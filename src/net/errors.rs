//! Network Error Types
//!
//! Structured errors for outbound fetches. Every variant is recoverable from
//! the gateway's point of view: it falls back to cache instead of failing.

/// Outbound fetch error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request error: {0}")]
    Request(String),
}

impl FetchError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited
                | FetchError::Timeout
                | FetchError::Network(_)
                | FetchError::Server(_, _)
        )
    }

    /// Create a FetchError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            408 => FetchError::Timeout,
            429 => FetchError::RateLimited,
            500..=599 => FetchError::Server(status, body.to_string()),
            _ => FetchError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() || err.is_request() {
            FetchError::Network(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}
