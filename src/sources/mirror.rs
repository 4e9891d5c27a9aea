//! Last-resort PDF mirror.
//!
//! The mirror serves an HTML landing page at `{base}/{doi}` that embeds or
//! links the PDF. Only reached in the final waterfall tier, and only
//! registered when `fulltext.mirror_base_url` is configured.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::fetch::{ContentFetcher, FetchLimits};
use crate::models::{CanonicalRecord, FetchFormat};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError,
};
use crate::utils::HttpClient;

/// Where mirror pages put the PDF, most specific first
const PDF_SELECTORS: [&str; 4] = [
    "iframe#pdf",
    "embed[type='application/pdf']",
    "#pdf embed, #pdf iframe",
    "a[href$='.pdf']",
];

#[derive(Debug, Clone)]
pub struct MirrorSource {
    fetcher: ContentFetcher,
    base_url: String,
}

impl MirrorSource {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            fetcher: ContentFetcher::new(http),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.fetcher = self.fetcher.with_limits(limits);
        self
    }

    /// Absolute PDF URL embedded in a landing page
    fn find_pdf_link(page_url: &str, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let base = url::Url::parse(page_url).ok()?;

        PDF_SELECTORS.iter().find_map(|css| {
            let selector = Selector::parse(css).ok()?;
            document.select(&selector).find_map(|element| {
                let value = element.value();
                let href = value.attr("src").or_else(|| value.attr("href"))?;
                // Embedded viewers append a fragment (#view=FitH)
                let href = href.split('#').next()?.trim();
                if href.is_empty() {
                    return None;
                }
                base.join(href).ok().map(String::from)
            })
        })
    }
}

#[async_trait]
impl SourceClient for MirrorSource {
    fn id(&self) -> &str {
        "mirror"
    }

    fn name(&self) -> &str {
        "PDF mirror"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::FULLTEXT_PDF
    }

    fn can_fetch(&self, publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.supports_format(format) && publication.doi().is_some()
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        if request.format != FetchFormat::Pdf {
            return Err(SourceError::NotImplemented);
        }
        let doi = request
            .doi()
            .ok_or_else(|| SourceError::NotFound("mirror needs a DOI".to_string()))?;

        let page_url = format!("{}/{}", self.base_url, doi);
        let page = self
            .fetcher
            .fetch_url(&page_url, FetchFormat::Structured)
            .await?;
        let html = String::from_utf8_lossy(&page.bytes);

        let pdf_url = Self::find_pdf_link(&page.url, &html)
            .ok_or_else(|| SourceError::NotFound(format!("mirror has no PDF for {}", doi)))?;
        tracing::debug!("Mirror PDF for {}: {}", doi, pdf_url);

        self.fetcher.fetch_url(&pdf_url, FetchFormat::Pdf).await
    }
}
