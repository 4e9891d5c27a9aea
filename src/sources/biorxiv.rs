//! bioRxiv/medRxiv preprint source.
//!
//! Both servers share the `10.1101/` DOI prefix and the same details API, so
//! one client resolves a DOI against bioRxiv first and medRxiv second, then
//! downloads the latest version's PDF.

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

const BIORXIV_API_URL: &str = "https://api.biorxiv.org";

/// DOI prefix shared by bioRxiv and medRxiv
const PREPRINT_DOI_PREFIX: &str = "10.1101/";

/// Server type for biorxiv/medrxiv
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerType {
    BioRxiv,
    MedRxiv,
}

impl ServerType {
    const ALL: [ServerType; 2] = [ServerType::BioRxiv, ServerType::MedRxiv];

    fn name(&self) -> &str {
        match self {
            ServerType::BioRxiv => "biorxiv",
            ServerType::MedRxiv => "medrxiv",
        }
    }

    fn site_url(&self) -> &str {
        match self {
            ServerType::BioRxiv => "https://www.biorxiv.org",
            ServerType::MedRxiv => "https://www.medrxiv.org",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiorxivSource {
    http: HttpClient,
    fetcher: ContentFetcher,
    api_url: String,
    /// Replaces both sites' PDF host when set
    site_override: Option<String>,
}

impl BiorxivSource {
    pub fn new(http: HttpClient) -> Self {
        Self {
            fetcher: ContentFetcher::new(http.clone()),
            http,
            api_url: BIORXIV_API_URL.to_string(),
            site_override: None,
        }
    }

    /// Serve the details API and PDFs from `base_url` (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.api_url = base.clone();
        self.site_override = Some(base);
        self
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }

    /// Latest version of a preprint on whichever server knows the DOI
    async fn resolve(&self, doi: &str) -> Result<(ServerType, PreprintDetails), SourceError> {
        for server in ServerType::ALL {
            let url = format!("{}/details/{}/{}", self.api_url, server.name(), doi);
            let response: DetailsResponse = match self.http.get_json(&url, &[]).await {
                Ok(response) => response,
                Err(SourceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let latest = response
                .collection
                .into_iter()
                .max_by_key(|d| d.version.parse::<u32>().unwrap_or(0));
            if let Some(details) = latest {
                return Ok((server, details));
            }
        }
        Err(SourceError::NotFound(format!("no preprint for {}", doi)))
    }

    fn pdf_url(&self, server: ServerType, details: &PreprintDetails) -> String {
        let site = self.site_override.as_deref().unwrap_or(server.site_url());
        format!("{}/content/{}v{}.full.pdf", site, details.doi, details.version)
    }
}

#[async_trait]
impl SourceClient for BiorxivSource {
    fn id(&self) -> &str {
        "biorxiv"
    }

    fn name(&self) -> &str {
        "bioRxiv/medRxiv"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FULLTEXT_PDF
    }

    fn can_fetch(&self, publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format)
            && publication
                .doi()
                .is_some_and(|doi| doi.starts_with(PREPRINT_DOI_PREFIX))
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        if request.format != FetchFormat::Pdf {
            return Err(SourceError::NotImplemented);
        }
        let doi = request
            .doi()
            .filter(|doi| doi.starts_with(PREPRINT_DOI_PREFIX))
            .ok_or_else(|| SourceError::NotFound("not a bioRxiv/medRxiv DOI".to_string()))?;

        let (server, details) = self.resolve(doi).await?;
        tracing::debug!("{} v{} found on {}", doi, details.version, server.name());
        self.fetcher
            .fetch_url(&self.pdf_url(server, &details), FetchFormat::Pdf)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    collection: Vec<PreprintDetails>,
}

#[derive(Debug, Deserialize)]
struct PreprintDetails {
    doi: String,
    #[serde(default)]
    version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Identifier};
    use crate::utils::RetryConfig;
    use std::sync::Arc;

    fn source(url: &str) -> BiorxivSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        BiorxivSource::new(http)
            .with_base_url(url)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn request(doi: &str) -> FetchRequest {
        let record = CanonicalRecord::from_identifier(Identifier::doi(doi).unwrap());
        FetchRequest::new(Arc::new(record), FetchFormat::Pdf)
    }

    #[test]
    fn test_can_fetch_only_preprint_dois() {
        let src = BiorxivSource::new(HttpClient::new());
        assert!(src.can_fetch(&request("10.1101/2020.01.01.000001").publication, FetchFormat::Pdf));
        assert!(!src.can_fetch(&request("10.1038/nature1").publication, FetchFormat::Pdf));
        assert!(!src.can_fetch(
            &request("10.1101/2020.01.01.000001").publication,
            FetchFormat::Structured
        ));
    }

    #[tokio::test]
    async fn test_fetch_latest_version_falls_back_to_medrxiv() {
        let mut server = mockito::Server::new_async().await;
        let _bio = server
            .mock("GET", "/details/biorxiv/10.1101/2020.01.01.000001")
            .with_body(r#"{"collection": []}"#)
            .create_async()
            .await;
        let _med = server
            .mock("GET", "/details/medrxiv/10.1101/2020.01.01.000001")
            .with_body(r#"{"collection": [
                {"doi": "10.1101/2020.01.01.000001", "version": "1"},
                {"doi": "10.1101/2020.01.01.000001", "version": "2"}
            ]}"#)
            .create_async()
            .await;
        let pdf = server
            .mock("GET", "/content/10.1101/2020.01.01.000001v2.full.pdf")
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.4 preprint")
            .create_async()
            .await;

        let content = source(&server.url())
            .fetch(&request("10.1101/2020.01.01.000001"))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Pdf);
        pdf.assert_async().await;
    }
}
