//! OpenAlex research source implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::models::{Identifier, IdentifierKind, RecordBuilder, RecordQuality, SourceRecord};
use crate::sources::{SourceCapabilities, SourceClient, SourceError, SourceQuery};
use crate::utils::HttpClient;

const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// OpenAlex research source
///
/// Uses the OpenAlex works API. A contact email puts requests in the polite pool.
#[derive(Debug, Clone)]
pub struct OpenAlexSource {
    http: HttpClient,
    base_url: String,
    email: Option<String>,
}

impl OpenAlexSource {
    pub fn new(http: HttpClient, email: Option<String>) -> Self {
        Self {
            http,
            base_url: OPENALEX_API_BASE.to_string(),
            email: email.filter(|e| !e.trim().is_empty()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn with_mailto<'a>(&'a self, mut params: Vec<(&'a str, &'a str)>) -> Vec<(&'a str, &'a str)> {
        if let Some(email) = &self.email {
            params.push(("mailto", email.as_str()));
        }
        params
    }

    fn parse_work(work: OAWork) -> Option<SourceRecord> {
        let source_id = work.id.rsplit('/').next()?.to_string();
        if source_id.is_empty() {
            return None;
        }

        let title = work.title.or(work.display_name).unwrap_or_default();
        let authors = work
            .authorships
            .into_iter()
            .filter_map(|a| a.author.and_then(|author| author.display_name));
        let summary = work
            .abstract_inverted_index
            .as_ref()
            .map(rebuild_abstract)
            .unwrap_or_default();

        let landing = work
            .best_oa_location
            .as_ref()
            .and_then(|l| l.landing_page_url.clone());
        let pdf_url = work.best_oa_location.as_ref().and_then(|l| l.pdf_url.clone());

        let mut builder = RecordBuilder::publication("openalex", source_id, title)
            .summary(summary)
            .authors(authors)
            .url(landing.unwrap_or_else(|| work.id.clone()))
            .quality(RecordQuality::AggregatorMetadata)
            .metadata(serde_json::json!({
                "openalex_id": work.id,
                "is_oa": work.open_access.as_ref().map(|oa| oa.is_oa).unwrap_or(false),
                "oa_url": work.open_access.and_then(|oa| oa.oa_url),
                "pdf_url": pdf_url,
            }));

        if let Some(doi) = work.doi {
            builder = builder.doi(doi);
        }
        if let Some(ids) = work.ids {
            if let Some(pmid) = ids.pmid.as_deref().and_then(last_segment) {
                builder = builder.pmid(pmid);
            }
            if let Some(pmcid) = ids.pmcid.as_deref().and_then(last_segment) {
                builder = builder.pmc_id(pmcid);
            }
        }
        if let Some(year) = work.publication_year {
            builder = builder.year(year);
        }
        if let Some(kind) = work.work_type {
            builder = builder.record_type(kind);
        }

        Some(builder.build())
    }
}

fn last_segment(url: &str) -> Option<&str> {
    url.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
}

/// Rebuild plain text from OpenAlex's `{word: [positions]}` abstract index
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
        .collect();
    positioned.sort_unstable();
    positioned
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SourceClient for OpenAlexSource {
    fn id(&self) -> &str {
        "openalex"
    }

    fn name(&self) -> &str {
        "OpenAlex"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    fn supports_identifier(&self, kind: IdentifierKind) -> bool {
        kind == IdentifierKind::Doi
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        let per_page = query.max_results.clamp(1, 200).to_string();
        let params = self.with_mailto(vec![
            ("search", query.raw.as_str()),
            ("per-page", per_page.as_str()),
        ]);
        let response: WorksResponse = self
            .http
            .get_json(&format!("{}/works", self.base_url), &params)
            .await?;

        let records: Vec<SourceRecord> = response
            .results
            .into_iter()
            .filter_map(Self::parse_work)
            .collect();
        tracing::debug!("OpenAlex returned {} works", records.len());
        Ok(records)
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        let Identifier::Doi(doi) = identifier else {
            return Err(SourceError::NotImplemented);
        };
        let params = self.with_mailto(Vec::new());
        let work: OAWork = self
            .http
            .get_json(&format!("{}/works/doi:{}", self.base_url, doi), &params)
            .await?;

        Self::parse_work(work)
            .map(|record| vec![record])
            .ok_or_else(|| SourceError::NotFound(identifier.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<OAWork>,
}

#[derive(Debug, Deserialize)]
struct OAWork {
    id: String,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(rename = "type", default)]
    work_type: Option<String>,
    #[serde(default)]
    ids: Option<OAIds>,
    #[serde(default)]
    authorships: Vec<OAAuthorship>,
    #[serde(default)]
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
    #[serde(default)]
    open_access: Option<OAOpenAccess>,
    #[serde(default)]
    best_oa_location: Option<OALocation>,
}

#[derive(Debug, Deserialize)]
struct OAIds {
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    pmcid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAAuthorship {
    #[serde(default)]
    author: Option<OAAuthor>,
}

#[derive(Debug, Deserialize)]
struct OAAuthor {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAOpenAccess {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OALocation {
    #[serde(default)]
    landing_page_url: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
}
