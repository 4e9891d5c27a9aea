//! Unpaywall source: resolves a DOI to its open-access copies.
//!
//! Used in two tiers: the landing page as HTML (tier 2) and the first PDF
//! location (tier 3). Unpaywall requires a contact email on every request.

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

const UNPAYWALL_API_BASE: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Clone)]
pub struct UnpaywallSource {
    http: HttpClient,
    fetcher: ContentFetcher,
    base_url: String,
    email: String,
}

impl UnpaywallSource {
    pub fn new(http: HttpClient, email: impl Into<String>) -> Self {
        Self {
            fetcher: ContentFetcher::new(http.clone()),
            http,
            base_url: UNPAYWALL_API_BASE.to_string(),
            email: email.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }

    async fn get_by_doi(&self, doi: &str) -> Result<UnpaywallResponse, SourceError> {
        self.http
            .get_json(
                &format!("{}/{}", self.base_url, doi),
                &[("email", self.email.as_str())],
            )
            .await
    }
}

impl UnpaywallResponse {
    /// Best location first, then the rest in Unpaywall's order
    fn locations(&self) -> impl Iterator<Item = &UnpaywallLocation> {
        self.best_oa_location.iter().chain(self.oa_locations.iter())
    }

    fn landing_url(&self) -> Option<&str> {
        self.locations()
            .find_map(|l| l.url_for_landing_page.as_deref().or(l.url.as_deref()))
    }

    fn pdf_url(&self) -> Option<&str> {
        self.locations().find_map(|l| l.url_for_pdf.as_deref())
    }
}

#[async_trait]
impl SourceClient for UnpaywallSource {
    fn id(&self) -> &str {
        "unpaywall"
    }

    fn name(&self) -> &str {
        "Unpaywall"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FULLTEXT_STRUCTURED | SourceCapabilities::FULLTEXT_PDF
    }

    fn can_fetch(&self, publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format) && publication.doi().is_some()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        let doi = request
            .doi()
            .ok_or_else(|| SourceError::NotFound("Unpaywall needs a DOI".to_string()))?;
        let response = self.get_by_doi(doi).await?;

        if !response.is_oa {
            return Err(SourceError::NotFound(format!("{} is not open access", doi)));
        }

        let url = match request.format {
            FetchFormat::Structured => response.landing_url(),
            FetchFormat::Pdf => response.pdf_url(),
        }
        .ok_or_else(|| {
            SourceError::NotFound(format!("no open-access {:?} location for {}", request.format, doi))
        })?;

        tracing::debug!("Unpaywall resolved {} to {}", doi, url);
        self.fetcher.fetch_url(url, request.format).await
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    best_oa_location: Option<UnpaywallLocation>,
    #[serde(default)]
    oa_locations: Vec<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    url_for_pdf: Option<String>,
    #[serde(default)]
    url_for_landing_page: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Identifier};
    use crate::utils::RetryConfig;
    use mockito::Matcher;
    use std::sync::Arc;

    fn source(url: &str) -> UnpaywallSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        UnpaywallSource::new(http, "me@example.org")
            .with_base_url(url)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn request(format: FetchFormat) -> FetchRequest {
        let record = CanonicalRecord::from_identifier(Identifier::doi("10.1000/oa").unwrap());
        FetchRequest::new(Arc::new(record), format)
    }

    #[tokio::test]
    async fn test_fetch_pdf_and_landing_page() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            r#"{{
              "doi": "10.1000/oa",
              "is_oa": true,
              "best_oa_location": {{
                "url": "{base}/landing",
                "url_for_landing_page": "{base}/landing",
                "url_for_pdf": null
              }},
              "oa_locations": [
                {{"url": "{base}/landing", "url_for_landing_page": "{base}/landing", "url_for_pdf": null}},
                {{"url": "{base}/paper.pdf", "url_for_pdf": "{base}/paper.pdf"}}
              ]
            }}"#,
            base = server.url()
        );
        let api = server
            .mock("GET", "/10.1000/oa")
            .match_query(Matcher::UrlEncoded("email".into(), "me@example.org".into()))
            .with_body(body)
            .expect(2)
            .create_async()
            .await;
        let _landing = server
            .mock("GET", "/landing")
            .with_header("content-type", "text/html")
            .with_body("<html><body><p>Article</p></body></html>")
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/paper.pdf")
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 oa")
            .create_async()
            .await;

        let src = source(&server.url());
        let html = src.fetch(&request(FetchFormat::Structured)).await.unwrap();
        assert_eq!(html.content_type, ContentType::Html);
        let pdf = src.fetch(&request(FetchFormat::Pdf)).await.unwrap();
        assert_eq!(pdf.content_type, ContentType::Pdf);
        api.assert_async().await;
    }

    #[tokio::test]
    async fn test_closed_access_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/10.1000/oa")
            .match_query(Matcher::Any)
            .with_body(r#"{"doi": "10.1000/oa", "is_oa": false, "oa_locations": []}"#)
            .create_async()
            .await;

        let err = source(&server.url())
            .fetch(&request(FetchFormat::Pdf))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_can_fetch_requires_doi() {
        let src = UnpaywallSource::new(HttpClient::new(), "me@example.org");
        let pmid_only = CanonicalRecord::from_identifier(Identifier::pmid("31452104").unwrap());
        assert!(!src.can_fetch(&pmid_only, FetchFormat::Pdf));
        assert!(src.can_fetch(&request(FetchFormat::Pdf).publication, FetchFormat::Pdf));
    }
}
