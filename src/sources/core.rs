//! CORE aggregator source (API v3).
//!
//! CORE harvests repository copies and exposes both their extracted text and
//! a download link. The extracted text is served as a minimal HTML document
//! so it can flow through the HTML extraction path.

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, ContentType, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

const CORE_API_BASE: &str = "https://api.core.ac.uk/v3";

#[derive(Debug, Clone)]
pub struct CoreSource {
    http: HttpClient,
    fetcher: ContentFetcher,
    base_url: String,
    api_key: String,
}

impl CoreSource {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            fetcher: ContentFetcher::new(http.clone()),
            http,
            base_url: CORE_API_BASE.to_string(),
            api_key: api_key.into(),
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

    async fn find_work(&self, doi: &str) -> Result<CoreWork, SourceError> {
        let query = format!("doi:\"{}\"", doi);
        let response: CoreSearchResponse = self
            .http
            .get_json_with_token(
                &format!("{}/search/works", self.base_url),
                &[("q", query.as_str()), ("limit", "1")],
                Some(&self.api_key),
            )
            .await?;

        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(format!("CORE has no work for {}", doi)))
    }
}

/// Wrap extracted plain text as HTML paragraphs, one per blank-line block
pub(crate) fn text_to_html(title: &str, text: &str) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head><title>");
    html.push_str(&escape_html(title));
    html.push_str("</title></head><body>");
    if !title.is_empty() {
        html.push_str("<h1>");
        html.push_str(&escape_html(title));
        html.push_str("</h1>");
    }

    let normalized = text.replace("\r\n", "\n");
    for block in normalized.split("\n\n") {
        let block = block.split_whitespace().collect::<Vec<_>>().join(" ");
        if block.is_empty() {
            continue;
        }
        html.push_str("<p>");
        html.push_str(&escape_html(&block));
        html.push_str("</p>");
    }
    html.push_str("</body></html>");
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl SourceClient for CoreSource {
    fn id(&self) -> &str {
        "core"
    }

    fn name(&self) -> &str {
        "CORE"
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
            .ok_or_else(|| SourceError::NotFound("CORE needs a DOI".to_string()))?;
        let work = self.find_work(doi).await?;

        match request.format {
            FetchFormat::Structured => {
                let url = format!("https://core.ac.uk/works/{}", work.id_string());
                let text = work
                    .full_text
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| SourceError::NotFound(format!("CORE has no text for {}", doi)))?;
                let html = text_to_html(work.title.as_deref().unwrap_or_default(), &text);
                Ok(FetchedContent {
                    bytes: html.into_bytes(),
                    content_type: ContentType::Html,
                    url,
                })
            }
            FetchFormat::Pdf => {
                let url = work
                    .download_url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| SourceError::NotFound(format!("CORE has no PDF for {}", doi)))?;
                self.fetcher.fetch_url(&url, FetchFormat::Pdf).await
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoreSearchResponse {
    #[serde(default)]
    results: Vec<CoreWork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreWork {
    id: serde_json::Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

impl CoreWork {
    fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identifier;
    use crate::utils::RetryConfig;
    use mockito::Matcher;
    use std::sync::Arc;

    fn source(url: &str) -> CoreSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        CoreSource::new(http, "secret")
            .with_base_url(url)
            .with_fetch_limits(FetchLimits::default().allow_private_hosts())
    }

    fn request(format: FetchFormat) -> FetchRequest {
        let record = CanonicalRecord::from_identifier(Identifier::doi("10.1000/core").unwrap());
        FetchRequest::new(Arc::new(record), format)
    }

    #[test]
    fn test_text_to_html() {
        let html = text_to_html("A <b> title", "First para\nstill first.\n\n\nSecond & last");
        assert!(html.contains("<h1>A &lt;b&gt; title</h1>"));
        assert!(html.contains("<p>First para still first.</p>"));
        assert!(html.contains("<p>Second &amp; last</p>"));
    }

    #[tokio::test]
    async fn test_fetch_full_text_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/search/works")
            .match_header("authorization", "Bearer secret")
            .match_query(Matcher::UrlEncoded("q".into(), "doi:\"10.1000/core\"".into()))
            .with_body(r#"{"totalHits": 1, "results": [{"id": 42, "title": "T", "fullText": "Body text.", "downloadUrl": null}]}"#)
            .create_async()
            .await;

        let content = source(&server.url())
            .fetch(&request(FetchFormat::Structured))
            .await
            .unwrap();
        assert_eq!(content.content_type, ContentType::Html);
        assert_eq!(content.url, "https://core.ac.uk/works/42");
        assert!(String::from_utf8(content.bytes).unwrap().contains("<p>Body text.</p>"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_download_url_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search/works")
            .match_query(Matcher::Any)
            .with_body(r#"{"results": [{"id": 42, "fullText": null}]}"#)
            .create_async()
            .await;

        let err = source(&server.url())
            .fetch(&request(FetchFormat::Pdf))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
