//! Raw content retrieval.
//!
//! [`ContentFetcher`] downloads XML, HTML or PDF bytes for a URL through the
//! owning provider's [`HttpClient`], so rate limiting and retry stay per
//! source. Every payload is checked before it leaves this module: size cap,
//! content-type sniffing, and the `%PDF-` signature for PDF requests.
//! [`ArtifactStore`] archives accepted payloads on disk.

mod artifacts;

pub use artifacts::{artifact_stem, ArtifactStore};

use crate::config::FullTextConfig;
use crate::models::{ContentType, FetchFormat};
use crate::sources::{FetchedContent, SourceError};
use crate::utils::{validate_url, HttpClient, RawBody};

/// Download size and destination policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: usize,
    /// Reject loopback and private network hosts
    pub block_private_hosts: bool,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            block_private_hosts: true,
        }
    }
}

impl FetchLimits {
    pub fn from_config(config: &FullTextConfig) -> Self {
        Self {
            max_bytes: config.max_download_mb.saturating_mul(1024 * 1024),
            block_private_hosts: config.block_private_hosts,
        }
    }

    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Allow loopback hosts (local test servers)
    pub fn allow_private_hosts(mut self) -> Self {
        self.block_private_hosts = false;
        self
    }
}

/// Downloads and validates full-text payloads
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    http: HttpClient,
    limits: FetchLimits,
}

impl ContentFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            limits: FetchLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    /// Download `url` and check it against the requested format
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn fetch_url(
        &self,
        url: &str,
        format: FetchFormat,
    ) -> Result<FetchedContent, SourceError> {
        let url = validate_url(url, self.limits.block_private_hosts)?;
        let body = self
            .http
            .get_bytes(url.as_str(), self.limits.max_bytes)
            .await?;
        self.accept(body, format)
    }

    /// Validate a downloaded body
    pub fn accept(&self, body: RawBody, format: FetchFormat) -> Result<FetchedContent, SourceError> {
        if body.bytes.is_empty() {
            return Err(SourceError::NotFound(format!("empty body from {}", body.url)));
        }
        if body.bytes.len() > self.limits.max_bytes {
            return Err(SourceError::Validation(format!(
                "{} bytes from {} exceeds the {} byte limit",
                body.bytes.len(),
                body.url,
                self.limits.max_bytes
            )));
        }

        let sniffed = ContentType::sniff(body.content_type.as_deref(), &body.bytes);
        let content_type = match format {
            FetchFormat::Pdf => {
                validate_pdf(&body.bytes)?;
                ContentType::Pdf
            }
            FetchFormat::Structured => match sniffed {
                Some(ContentType::Pdf) => {
                    return Err(SourceError::Validation(format!(
                        "expected XML or HTML from {}, got a PDF",
                        body.url
                    )))
                }
                Some(kind) => kind,
                // Unlabelled text goes down the plain-text path
                None if std::str::from_utf8(&body.bytes).is_ok() => ContentType::Html,
                None => {
                    return Err(SourceError::Validation(format!(
                        "unrecognised binary payload from {}",
                        body.url
                    )))
                }
            },
        };

        Ok(FetchedContent {
            bytes: body.bytes,
            content_type,
            url: body.url,
        })
    }
}

/// A PDF must start with the `%PDF-` signature, after optional leading whitespace
pub fn validate_pdf(bytes: &[u8]) -> Result<(), SourceError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    if bytes[start..].starts_with(b"%PDF-") {
        Ok(())
    } else {
        Err(SourceError::Validation("missing %PDF- signature".to_string()))
    }
}
