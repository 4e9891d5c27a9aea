//! PubMed Central (PMC) research source implementation.
//!
//! Tier 1 provider: JATS XML through E-utilities `efetch` (`db=pmc`) and the
//! article PDF from the PMC site.

use async_trait::async_trait;

use super::eutils::EUtils;
use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

const PMC_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov";

/// PMC research source
#[derive(Debug, Clone)]
pub struct PmcSource {
    eutils: EUtils,
    fetcher: ContentFetcher,
    site_url: String,
}

impl PmcSource {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            fetcher: ContentFetcher::new(http.clone()),
            eutils: EUtils::new(http, api_key),
            site_url: PMC_BASE_URL.to_string(),
        }
    }

    /// Serve E-utilities and article PDFs from `base_url` (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.eutils.set_base_url(base.clone());
        self.site_url = base;
        self
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }

    /// Clean PMCID (remove PMC prefix if present)
    fn clean_pmcid(pmcid: &str) -> &str {
        pmcid.trim().trim_start_matches("PMC")
    }

    async fn fetch_jats(&self, pmcid: &str) -> Result<FetchedContent, SourceError> {
        let url = self.eutils.url_with(
            "efetch.fcgi",
            &[
                ("db", "pmc"),
                ("id", Self::clean_pmcid(pmcid)),
                ("retmode", "xml"),
            ],
        )?;
        let content = self
            .fetcher
            .fetch_url(url.as_str(), FetchFormat::Structured)
            .await?;

        // Non open-access articles come back as an empty set or an <error> element
        let head = String::from_utf8_lossy(&content.bytes);
        if !head.contains("<article") {
            return Err(SourceError::NotFound(format!(
                "PMC has no open-access XML for {}",
                pmcid
            )));
        }
        Ok(content)
    }
}

#[async_trait]
impl SourceClient for PmcSource {
    fn id(&self) -> &str {
        "pmc"
    }

    fn name(&self) -> &str {
        "PubMed Central"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FULLTEXT_STRUCTURED | SourceCapabilities::FULLTEXT_PDF
    }

    fn can_fetch(&self, publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format) && publication.pmc_id().is_some()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        let pmcid = request
            .pmc_id()
            .ok_or_else(|| SourceError::NotFound("PMC needs a PMC id".to_string()))?;

        match request.format {
            FetchFormat::Structured => self.fetch_jats(pmcid).await,
            FetchFormat::Pdf => {
                let url = format!("{}/pmc/articles/{}/pdf/", self.site_url, pmcid);
                self.fetcher.fetch_url(&url, FetchFormat::Pdf).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Identifier};
    use crate::utils::RetryConfig;
    use mockito::Matcher;
    use std::sync::Arc;

    fn source(url: &str) -> PmcSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        PmcSource::new(http, None)
            .with_base_url(url)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn request(format: FetchFormat) -> FetchRequest {
        let record = CanonicalRecord::from_identifier(Identifier::pmcid("PMC7000001").unwrap());
        FetchRequest::new(Arc::new(record), format)
    }

    #[test]
    fn test_clean_pmcid() {
        assert_eq!(PmcSource::clean_pmcid("PMC7000001"), "7000001");
        assert_eq!(PmcSource::clean_pmcid("7000001"), "7000001");
    }

    #[tokio::test]
    async fn test_fetch_jats() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "pmc".into()),
                Matcher::UrlEncoded("id".into(), "7000001".into()),
            ]))
            .with_header("content-type", "text/xml")
            .with_body("<pmc-articleset><article><front/><body/></article></pmc-articleset>")
            .create_async()
            .await;

        let content = source(&server.url())
            .fetch(&request(FetchFormat::Structured))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Xml);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_jats_error_document_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::Any)
            .with_header("content-type", "text/xml")
            .with_body("<pmc-articleset><error>not open access</error></pmc-articleset>")
            .create_async()
            .await;

        let err = source(&server.url())
            .fetch(&request(FetchFormat::Structured))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_pdf_rejects_html() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/pmc/articles/PMC7000001/pdf/")
            .with_header("content-type", "text/html")
            .with_body("<html>Preparing to download</html>")
            .create_async()
            .await;

        let err = source(&server.url())
            .fetch(&request(FetchFormat::Pdf))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
    }

    #[test]
    fn test_can_fetch() {
        let src = PmcSource::new(HttpClient::new(), None);
        let doi_only = CanonicalRecord::from_identifier(Identifier::doi("10.1/x").unwrap());
        assert!(!src.can_fetch(&doi_only, FetchFormat::Structured));
        assert!(src.can_fetch(&request(FetchFormat::Pdf).publication, FetchFormat::Pdf));
    }
}
