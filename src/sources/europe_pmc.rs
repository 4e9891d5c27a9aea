//! EuropePMC research source implementation using their REST API.
//!
//! EuropePMC indexes PubMed, PMC, and preprints from bioRxiv/medRxiv. Besides
//! search it serves open-access JATS (`fullTextXML`) and rendered PDFs for
//! articles with a PMC id.

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{
    CanonicalRecord, FetchFormat, Identifier, IdentifierKind, RecordBuilder, RecordQuality,
    SourceRecord,
};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError, SourceQuery,
};
use crate::utils::HttpClient;

/// EuropePMC REST API base URL
const EUROPE_PMC_API_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

/// Site serving rendered PDFs
const EUROPE_PMC_SITE_URL: &str = "https://europepmc.org";

/// EuropePMC research source
#[derive(Debug, Clone)]
pub struct EuropePmcSource {
    http: HttpClient,
    fetcher: ContentFetcher,
    api_url: String,
    site_url: String,
}

impl EuropePmcSource {
    /// Create a new EuropePMC source
    pub fn new(http: HttpClient) -> Self {
        Self {
            fetcher: ContentFetcher::new(http.clone()),
            http,
            api_url: EUROPE_PMC_API_URL.to_string(),
            site_url: EUROPE_PMC_SITE_URL.to_string(),
        }
    }

    /// Serve both the REST API and rendered PDFs from `base_url` (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.api_url = base.clone();
        self.site_url = base;
        self
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }

    async fn query(&self, query: &str, page_size: usize) -> Result<Vec<SourceRecord>, SourceError> {
        let page_size = page_size.to_string();
        let params = [
            ("query", query),
            ("resultType", "core"),
            ("format", "json"),
            ("pageSize", page_size.as_str()),
        ];
        let response: SearchResponse = self
            .http
            .get_json(&format!("{}/search", self.api_url), &params)
            .await?;

        Ok(response
            .result_list
            .result
            .into_iter()
            .filter_map(Self::parse_result)
            .collect())
    }

    /// Parse a single result into a record
    fn parse_result(item: SearchResultItem) -> Option<SourceRecord> {
        let source_id = item
            .id
            .clone()
            .or_else(|| item.pmid.clone())
            .or_else(|| item.doi.clone())?;

        let url = match &item.pmid {
            Some(pmid) => format!("https://europepmc.org/article/MED/{}", pmid),
            None => format!("https://europepmc.org/article/{}/{}", item.source, source_id),
        };

        let authors: Vec<String> = item
            .author_string
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('.')
            .split(", ")
            .map(str::to_string)
            .collect();

        let mut builder = RecordBuilder::publication("europe_pmc", source_id, item.title.unwrap_or_default())
            .summary(strip_tags(item.abstract_text.as_deref().unwrap_or_default()))
            .authors(authors)
            .url(url)
            .quality(RecordQuality::AggregatorMetadata)
            .metadata(serde_json::json!({
                "source": item.source,
                "open_access": item.is_open_access.as_deref() == Some("Y"),
                "journal": item.journal_title,
            }));

        if let Some(pmid) = item.pmid {
            builder = builder.pmid(pmid);
        }
        if let Some(pmcid) = item.pmcid {
            builder = builder.pmc_id(pmcid);
        }
        if let Some(doi) = item.doi {
            builder = builder.doi(doi);
        }
        if let Some(year) = item.pub_year.and_then(|y| y.parse().ok()) {
            builder = builder.year(year);
        }
        if let Some(kind) = item
            .pub_type_list
            .and_then(|list| list.pub_type.into_iter().next())
        {
            builder = builder.record_type(kind);
        }

        Some(builder.build())
    }
}

/// Remove inline markup EuropePMC leaves in abstracts
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[async_trait]
impl SourceClient for EuropePmcSource {
    fn id(&self) -> &str {
        "europe_pmc"
    }

    fn name(&self) -> &str {
        "EuropePMC"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::LOOKUP
            | SourceCapabilities::FULLTEXT_STRUCTURED
            | SourceCapabilities::FULLTEXT_PDF
    }

    fn supports_identifier(&self, kind: IdentifierKind) -> bool {
        matches!(
            kind,
            IdentifierKind::Doi | IdentifierKind::Pmid | IdentifierKind::PmcId
        )
    }

    fn can_fetch(&self, publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format) && publication.pmc_id().is_some()
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        let mut text = query.raw.clone();
        if let Some(organism) = &query.filters.organism {
            text = format!("({}) AND ORGANISM:\"{}\"", text, organism);
        }
        let records = self.query(&text, query.max_results).await?;
        tracing::debug!("EuropePMC returned {} records", records.len());
        Ok(records)
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        let query = match identifier {
            Identifier::Doi(doi) => format!("DOI:\"{}\"", doi),
            Identifier::Pmid(pmid) => format!("EXT_ID:{} AND SRC:MED", pmid),
            Identifier::PmcId(pmcid) => format!("PMCID:{}", pmcid),
            Identifier::Accession(_) => return Err(SourceError::NotImplemented),
        };

        let records: Vec<SourceRecord> = self
            .query(&query, 5)
            .await?
            .into_iter()
            .filter(|r| r.identifiers().contains(identifier))
            .collect();
        if records.is_empty() {
            return Err(SourceError::NotFound(identifier.to_string()));
        }
        Ok(records)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        let pmcid = request
            .pmc_id()
            .ok_or_else(|| SourceError::NotFound("EuropePMC needs a PMC id".to_string()))?;

        let url = match request.format {
            FetchFormat::Structured => format!("{}/{}/fullTextXML", self.api_url, pmcid),
            FetchFormat::Pdf => format!("{}/articles/{}?pdf=render", self.site_url, pmcid),
        };
        self.fetcher.fetch_url(&url, request.format).await
    }
}

/// Search response wrapper
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "resultList", default)]
    result_list: ResultList,
}

/// List of results
#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<SearchResultItem>,
}

/// Individual search result
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    pmcid: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author_string: Option<String>,
    #[serde(default)]
    abstract_text: Option<String>,
    #[serde(default)]
    pub_year: Option<String>,
    #[serde(default)]
    journal_title: Option<String>,
    #[serde(default)]
    is_open_access: Option<String>,
    #[serde(default)]
    pub_type_list: Option<PubTypeList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubTypeList {
    #[serde(default)]
    pub_type: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use crate::utils::RetryConfig;
    use mockito::Matcher;
    use std::sync::Arc;

    const SEARCH_JSON: &str = r#"{
      "version": "6.9",
      "hitCount": 1,
      "resultList": {"result": [{
        "id": "31452104",
        "source": "MED",
        "pmid": "31452104",
        "pmcid": "PMC7000001",
        "doi": "10.1038/s41467-019-1",
        "title": "Transcriptomic profiling of breast cancer",
        "authorString": "Doe J, Roe R.",
        "abstractText": "Breast <i>cancer</i> is heterogeneous.",
        "pubYear": "2019",
        "isOpenAccess": "Y",
        "pubTypeList": {"pubType": ["research-article"]}
      }]}
    }"#;

    fn source(url: &str) -> EuropePmcSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        EuropePmcSource::new(http)
            .with_base_url(url)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn publication_with_pmc() -> Arc<CanonicalRecord> {
        Arc::new(CanonicalRecord::from_identifier(
            Identifier::pmcid("PMC7000001").unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_search_parses_results() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(Matcher::UrlEncoded("format".into(), "json".into()))
            .with_body(SEARCH_JSON)
            .create_async()
            .await;

        let records = source(&server.url())
            .search(&SourceQuery::plain("breast cancer", 10))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let data = records[0].data();
        assert_eq!(data.ids.pmc_id.as_deref(), Some("PMC7000001"));
        assert_eq!(data.authors, vec!["Doe J", "Roe R"]);
        assert_eq!(data.summary, "Breast cancer is heterogeneous.");
        assert_eq!(data.year, Some(2019));
        assert_eq!(data.metadata["open_access"], true);
    }

    #[tokio::test]
    async fn test_lookup_by_doi() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/search")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "DOI:\"10.1038/s41467-019-1\"".into(),
            ))
            .with_body(SEARCH_JSON)
            .create_async()
            .await;

        let id = Identifier::doi("10.1038/s41467-019-1").unwrap();
        let records = source(&server.url()).lookup(&id).await.unwrap();
        assert_eq!(records.len(), 1);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_full_text_xml() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/PMC7000001/fullTextXML")
            .with_header("content-type", "application/xml")
            .with_body("<?xml version=\"1.0\"?><article><body/></article>")
            .create_async()
            .await;

        let content = source(&server.url())
            .fetch(&FetchRequest::new(publication_with_pmc(), FetchFormat::Structured))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Xml);
    }

    #[tokio::test]
    async fn test_fetch_render_pdf() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/articles/PMC7000001")
            .match_query(Matcher::UrlEncoded("pdf".into(), "render".into()))
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.6 rendered")
            .create_async()
            .await;

        let content = source(&server.url())
            .fetch(&FetchRequest::new(publication_with_pmc(), FetchFormat::Pdf))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Pdf);
    }

    #[test]
    fn test_can_fetch_requires_pmc_id() {
        let src = EuropePmcSource::new(HttpClient::new());
        let without = CanonicalRecord::from_identifier(Identifier::pmid("31452104").unwrap());
        assert!(!src.can_fetch(&without, FetchFormat::Structured));
        assert!(src.can_fetch(&publication_with_pmc(), FetchFormat::Pdf));
    }
}
