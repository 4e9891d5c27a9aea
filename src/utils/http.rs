//! HTTP client utilities.
//!
//! [`HttpClient`] wraps a shared `reqwest::Client` with a per-client
//! token-bucket [`RateLimiter`], status-code classification into
//! [`SourceError`] and bounded retry. Each provider owns one, so limits are
//! independent per source while remaining safe to share across concurrent
//! searches.

use futures_util::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{with_retry, RetryConfig};
use crate::sources::SourceError;

/// Token-bucket limiter shared by every clone of an [`HttpClient`]
pub type RateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// User agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build a quota for `rps` requests per second; `None` disables limiting.
///
/// Fractional rates are allowed (0.5 means one request every two seconds).
pub fn quota(requests_per_second: f64, burst: u32) -> Option<Quota> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return None;
    }
    let period = Duration::from_secs_f64(1.0 / requests_per_second);
    let burst = NonZeroU32::new(burst).unwrap_or(nonzero_ext::nonzero!(1u32));
    Quota::with_period(period).map(|q| q.allow_burst(burst))
}

/// Raw response body with the metadata the fetcher needs
#[derive(Debug, Clone)]
pub struct RawBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL after redirects
    pub url: String,
}

/// Builder for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
    requests_per_second: Option<f64>,
    burst: u32,
    retry: RetryConfig,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            requests_per_second: None,
            burst: 1,
            retry: RetryConfig::default(),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Limit to `rps` requests per second
    pub fn rate_limit(mut self, rps: f64, burst: u32) -> Self {
        self.requests_per_second = Some(rps);
        self.burst = burst;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> HttpClient {
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        let limiter = self
            .requests_per_second
            .and_then(|rps| quota(rps, self.burst))
            .map(|q| Arc::new(RateLimiter::direct(q)));

        HttpClient {
            client: Arc::new(client),
            limiter,
            timeout: self.timeout,
            retry: self.retry,
        }
    }
}

/// Shared HTTP client with rate limiting and retry
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    limiter: Option<Arc<RateLimiter>>,
    timeout: Duration,
    retry: RetryConfig,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("rate_limited", &self.limiter.is_some())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpClient {
    /// Create a new HTTP client with default settings and no rate limit
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Get the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a rate-limit permit
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// GET with query parameters, rate limiting, status classification and retry
    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response, SourceError> {
        self.get_with_token(url, query, None).await
    }

    /// GET with an optional bearer token
    pub async fn get_with_token(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Response, SourceError> {
        with_retry(self.retry, move || async move {
            self.acquire().await;
            tracing::debug!("GET {}", url);
            let mut request = self.client.get(url).query(query);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| self.classify_transport(e))?;
            check_status(response)
        })
        .await
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        self.get_json_with_token(url, query, None).await
    }

    /// GET and decode a JSON body, sending a bearer token when given
    pub async fn get_json_with_token<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<T, SourceError> {
        let response = self.get_with_token(url, query, token).await?;
        let text = response
            .text()
            .await
            .map_err(|e| self.classify_transport(e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// GET and return the body as text
    pub async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, SourceError> {
        let response = self.get(url, query).await?;
        response.text().await.map_err(|e| self.classify_transport(e))
    }

    /// GET and return the raw body with its content type and final URL.
    ///
    /// The body is streamed and the read stops with a validation error as
    /// soon as it passes `max_bytes`, or up front when `Content-Length`
    /// already exceeds it.
    pub async fn get_bytes(&self, url: &str, max_bytes: usize) -> Result<RawBody, SourceError> {
        let response = self.get(url, &[]).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let too_large = |len: u64| {
            SourceError::Validation(format!(
                "body of {} bytes from {} exceeds the {} byte limit",
                len, final_url, max_bytes
            ))
        };
        if let Some(len) = response.content_length() {
            if len > max_bytes as u64 {
                return Err(too_large(len));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify_transport(e))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(too_large((bytes.len() + chunk.len()) as u64));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(RawBody {
            bytes,
            content_type,
            url: final_url,
        })
    }

    fn classify_transport(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::from(err)
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an HTTP status into the error taxonomy
pub fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited {
            retry_after: response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(SourceError::NotFound(url)),
        s if s.is_server_error() => Err(SourceError::SourceUnavailable(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
        s => Err(SourceError::InvalidRequest(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_client() -> HttpClient {
        HttpClient::builder()
            .retry(
                RetryConfig::default()
                    .initial_delay(Duration::from_millis(1))
                    .max_delay(Duration::from_millis(5)),
            )
            .build()
    }

    #[test]
    fn test_quota() {
        assert!(quota(0.0, 1).is_none());
        assert!(quota(-1.0, 1).is_none());
        assert!(quota(f64::NAN, 1).is_none());
        assert!(quota(0.5, 1).is_some());
        assert!(quota(10.0, 0).is_some());
    }

    #[tokio::test]
    async fn test_rate_limiter_is_shared_across_clones() {
        let client = HttpClient::builder().rate_limit(1000.0, 2).build();
        let clone = client.clone();
        client.acquire().await;
        clone.acquire().await;
        assert!(Arc::ptr_eq(
            client.limiter.as_ref().unwrap(),
            clone.limiter.as_ref().unwrap()
        ));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;
        let bad = server
            .mock("GET", "/bad")
            .with_status(400)
            .create_async()
            .await;

        let client = fast_client();
        let err = client
            .get(&format!("{}/missing", server.url()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));

        let err = client
            .get(&format!("{}/bad", server.url()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));

        missing.assert_async().await;
        bad.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_is_retried_three_times() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(3)
            .create_async()
            .await;

        let err = fast_client()
            .get(&format!("{}/limited", server.url()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::RateLimited { .. }));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_bytes_reports_content_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/doc.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 test")
            .create_async()
            .await;

        let body = fast_client()
            .get_bytes(&format!("{}/doc.pdf", server.url()), 1024)
            .await
            .unwrap();
        assert_eq!(body.content_type.as_deref(), Some("application/pdf"));
        assert!(body.bytes.starts_with(b"%PDF-"));
        assert!(body.url.ends_with("/doc.pdf"));
    }

    #[tokio::test]
    async fn test_get_bytes_stops_past_limit() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/big.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(vec![b'x'; 64 * 1024])
            .create_async()
            .await;

        let err = fast_client()
            .get_bytes(&format!("{}/big.pdf", server.url()), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));

        let body = fast_client()
            .get_bytes(&format!("{}/big.pdf", server.url()), 64 * 1024)
            .await
            .unwrap();
        assert_eq!(body.bytes.len(), 64 * 1024);
    }
}
