//! HTTP client wrapper.
//!
//! Thin layer over reqwest that fixes the timeout and user agent and turns
//! non-success statuses into `FetchFailed` errors. It never retries; retry
//! is the caller's decision.

use crate::config::NetworkConfig;
use crate::{Result, SyncError};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// HTTP client used by the remote backend.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::FETCH_TIMEOUT)
    }

    /// Create a new HTTP client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| SyncError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make a GET request.
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error("GET", url, e))?;
        check_response_status(response, url)
    }

    /// Make a HEAD request.
    pub async fn head(&self, url: &str) -> Result<Response> {
        debug!("HEAD {}", url);
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| request_error("HEAD", url, e))?;
        check_response_status(response, url)
    }

    /// Check if an HTTP status code indicates a permanent failure.
    pub fn is_permanent_failure(status: StatusCode) -> bool {
        matches!(status.as_u16(), 400 | 401 | 403 | 404 | 410)
    }
}

fn request_error(method: &str, url: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        debug!("{} {} timed out", method, url);
    }
    SyncError::fetch(url, format!("{} failed: {}", method, err))
}

fn check_response_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let hint = if HttpClient::is_permanent_failure(status) {
        "permanent"
    } else {
        "transient"
    };
    Err(SyncError::fetch(
        url,
        format!("server returned {} ({})", status, hint),
    ))
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("unknown").to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_permanent_failures() {
        assert!(HttpClient::is_permanent_failure(StatusCode::NOT_FOUND));
        assert!(!HttpClient::is_permanent_failure(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://storage.example.com/b/x.jpg"), "storage.example.com");
        assert_eq!(extract_domain("not a url"), "unknown");
    }
}
