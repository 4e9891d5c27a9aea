//! Shared NCBI E-utilities calls used by the GEO, PubMed and PMC clients.

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::sources::SourceError;
use crate::utils::HttpClient;

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

#[derive(Debug, Clone)]
pub struct EUtils {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl EUtils {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn with_key<'a>(&'a self, mut params: Vec<(&'a str, &'a str)>) -> Vec<(&'a str, &'a str)> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        params
    }

    /// Absolute URL for an endpoint, for payloads fetched through a [`ContentFetcher`](crate::fetch::ContentFetcher)
    pub fn url_with(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<url::Url, SourceError> {
        let params = self.with_key(params.to_vec());
        url::Url::parse_with_params(&self.url(endpoint), &params)
            .map_err(|e| SourceError::InvalidRequest(format!("{}: {}", endpoint, e)))
    }

    /// Run `esearch` and return matched UIDs in relevance order
    pub async fn esearch(
        &self,
        db: &str,
        term: &str,
        retmax: usize,
    ) -> Result<Vec<String>, SourceError> {
        let retmax = retmax.to_string();
        let params = self.with_key(vec![
            ("db", db),
            ("term", term),
            ("retmax", retmax.as_str()),
            ("retmode", "xml"),
        ]);
        let xml = self.http.get_text(&self.url("esearch.fcgi"), &params).await?;
        parse_esearch(&xml)
    }

    /// Run `efetch` and return the raw body
    pub async fn efetch(
        &self,
        db: &str,
        ids: &[String],
        retmode: &str,
    ) -> Result<String, SourceError> {
        let ids = ids.join(",");
        let params = self.with_key(vec![("db", db), ("id", ids.as_str()), ("retmode", retmode)]);
        self.http.get_text(&self.url("efetch.fcgi"), &params).await
    }

    /// Run `esummary` in JSON mode
    pub async fn esummary(
        &self,
        db: &str,
        ids: &[String],
    ) -> Result<serde_json::Value, SourceError> {
        let ids = ids.join(",");
        let params = self.with_key(vec![("db", db), ("id", ids.as_str()), ("retmode", "json")]);
        self.http.get_json(&self.url("esummary.fcgi"), &params).await
    }
}

/// Parse E-utilities search response XML
pub fn parse_esearch(xml: &str) -> Result<Vec<String>, SourceError> {
    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct ESearchResult {
        #[serde(default)]
        IdList: IdList,
    }

    #[derive(Debug, Default, Deserialize)]
    #[allow(non_snake_case)]
    struct IdList {
        #[serde(rename = "Id", default)]
        ids: Vec<String>,
    }

    let result: ESearchResult = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse esearch XML: {}", e)))?;

    Ok(result
        .IdList
        .ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}
