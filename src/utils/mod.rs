//! Utility modules shared by the providers and the pipeline.
//!
//! - [`HttpClient`]: HTTP client with a per-client token-bucket rate limiter
//! - [`RetryConfig`] / [`with_retry`]: bounded exponential backoff on transient errors
//! - identifier normalization and URL/path validation helpers
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use bioharvest::sources::SourceError;
//! use bioharvest::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let config = RetryConfig::default().max_attempts(3);
//! let data = with_retry(config, || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod http;
mod retry;
mod validate;

pub use http::{check_status, quota, HttpClient, HttpClientBuilder, RateLimiter, RawBody, DEFAULT_USER_AGENT};
pub use retry::{with_retry, RetryConfig, TransientError};
pub use validate::{
    is_accession, normalize_accession, normalize_doi, normalize_pmcid,
    normalize_pmid, sanitize_filename, validate_url, ValidationError,
};
