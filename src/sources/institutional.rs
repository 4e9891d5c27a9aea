//! Institutional access adapter.
//!
//! Proxy and authentication mechanics live outside this crate behind
//! [`InstitutionalAccess`]; this module only turns a resolved URL into a
//! validated download, so institutional copies can sit in the premium tier
//! like any other provider.

use async_trait::async_trait;
use std::sync::Arc;

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

/// Resolves a publication to a URL the institution can serve, or denies access
#[async_trait]
pub trait InstitutionalAccess: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, publication: &CanonicalRecord) -> Option<url::Url>;
}

#[derive(Debug, Clone)]
pub struct InstitutionalSource {
    access: Arc<dyn InstitutionalAccess>,
    fetcher: ContentFetcher,
}

impl InstitutionalSource {
    pub fn new(access: Arc<dyn InstitutionalAccess>, http: HttpClient) -> Self {
        Self {
            access,
            fetcher: ContentFetcher::new(http),
        }
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }
}

#[async_trait]
impl SourceClient for InstitutionalSource {
    fn id(&self) -> &str {
        "institutional"
    }

    fn name(&self) -> &str {
        "Institutional access"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FULLTEXT_STRUCTURED | SourceCapabilities::FULLTEXT_PDF
    }

    fn can_fetch(&self, _publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        let url = self
            .access
            .resolve(&request.publication)
            .await
            .ok_or_else(|| SourceError::NotFound("institutional access denied".to_string()))?;

        tracing::debug!("Institutional access resolved to {}", url);
        self.fetcher.fetch_url(url.as_str(), request.format).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Identifier};
    use crate::utils::RetryConfig;

    #[derive(Debug)]
    struct FixedAccess(Option<String>);

    #[async_trait]
    impl InstitutionalAccess for FixedAccess {
        async fn resolve(&self, _publication: &CanonicalRecord) -> Option<url::Url> {
            self.0.as_deref().and_then(|u| url::Url::parse(u).ok())
        }
    }

    fn source(access: FixedAccess) -> InstitutionalSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        InstitutionalSource::new(Arc::new(access), http)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn request(format: FetchFormat) -> FetchRequest {
        let record = CanonicalRecord::from_identifier(Identifier::doi("10.1000/paywalled").unwrap());
        FetchRequest::new(Arc::new(record), format)
    }

    #[tokio::test]
    async fn test_denied_access_is_not_found() {
        let err = source(FixedAccess(None))
            .fetch(&request(FetchFormat::Pdf))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_resolved_url() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/proxy/article.xml")
            .with_header("content-type", "application/xml")
            .with_body("<article><body><p>x</p></body></article>")
            .create_async()
            .await;

        let access = FixedAccess(Some(format!("{}/proxy/article.xml", server.url())));
        let content = source(access)
            .fetch(&request(FetchFormat::Structured))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Xml);
    }
}
