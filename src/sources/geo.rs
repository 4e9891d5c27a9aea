//! NCBI GEO DataSets source (`db=gds`) using E-utilities.

use async_trait::async_trait;
use serde::Deserialize;

use super::eutils::EUtils;
use super::pubmed::leading_year;
use crate::models::{Identifier, IdentifierKind, RecordBuilder, RecordQuality, SourceRecord};
use crate::sources::{SourceCapabilities, SourceClient, SourceError, SourceQuery};
use crate::utils::HttpClient;

const GEO_ACC_URL: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc=";

/// GEO DataSets source
///
/// Searches series records and resolves GEO accessions. Records are built
/// from the JSON `esummary` document.
#[derive(Debug, Clone)]
pub struct GeoSource {
    eutils: EUtils,
}

#[derive(Debug, Deserialize)]
struct GdsSummary {
    #[serde(default)]
    accession: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    taxon: String,
    #[serde(default)]
    gdstype: String,
    #[serde(default)]
    n_samples: Option<u32>,
    #[serde(default)]
    pdat: String,
    #[serde(default)]
    entrytype: String,
    #[serde(default)]
    pubmedids: Vec<serde_json::Value>,
}

impl GeoSource {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self {
            eutils: EUtils::new(http, api_key),
        }
    }

    /// Point at a different E-utilities host (for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.eutils.set_base_url(base_url);
        self
    }

    fn build_term(query: &SourceQuery) -> String {
        let mut parts = vec![format!("({})", query.text)];
        if let Some(organism) = &query.filters.organism {
            parts.push(format!("\"{}\"[Organism]", organism));
        }
        if let Some(kind) = &query.filters.record_type {
            parts.push(format!("\"{}\"[DataSet Type]", kind));
        }
        parts.push("gse[Entry Type]".to_string());
        parts.join(" AND ")
    }

    async fn summaries(&self, uids: &[String]) -> Result<Vec<SourceRecord>, SourceError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let doc = self.eutils.esummary("gds", uids).await?;
        parse_summaries(&doc)
    }
}

fn parse_summaries(doc: &serde_json::Value) -> Result<Vec<SourceRecord>, SourceError> {
    let result = doc
        .get("result")
        .ok_or_else(|| SourceError::Parse("esummary response has no result".to_string()))?;
    let uids = result
        .get("uids")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids.iter().filter_map(|u| u.as_str()) {
        let Some(entry) = result.get(uid) else {
            continue;
        };
        let summary: GdsSummary = serde_json::from_value(entry.clone())?;
        if summary.accession.is_empty() {
            continue;
        }

        let pubmed_ids: Vec<String> = summary
            .pubmedids
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        let mut builder = RecordBuilder::dataset("geo", summary.accession.as_str(), summary.title)
            .accession(summary.accession.as_str())
            .summary(summary.summary)
            .organism(summary.taxon)
            .record_type(summary.gdstype)
            .url(format!("{}{}", GEO_ACC_URL, summary.accession))
            .quality(RecordQuality::StructuredXml)
            .metadata(serde_json::json!({
                "uid": uid,
                "entry_type": summary.entrytype,
                "pubmed_ids": pubmed_ids,
            }));
        if let Some(n) = summary.n_samples {
            builder = builder.sample_count(n);
        }
        if let Some(year) = leading_year(&summary.pdat) {
            builder = builder.year(year);
        }
        records.push(builder.build());
    }
    Ok(records)
}

#[async_trait]
impl SourceClient for GeoSource {
    fn id(&self) -> &str {
        "geo"
    }

    fn name(&self) -> &str {
        "NCBI GEO"
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::LOOKUP
    }

    fn quality(&self) -> RecordQuality {
        RecordQuality::StructuredXml
    }

    fn supports_identifier(&self, kind: IdentifierKind) -> bool {
        kind == IdentifierKind::Accession
    }

    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        let term = Self::build_term(query);
        let uids = self.eutils.esearch("gds", &term, query.max_results).await?;
        let mut records = self.summaries(&uids).await?;

        if let Some(min) = query.filters.min_samples {
            records.retain(|r| r.data().sample_count.is_some_and(|n| n >= min));
        }
        tracing::debug!("GEO returned {} datasets", records.len());
        Ok(records)
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        let Identifier::Accession(accession) = identifier else {
            return Err(SourceError::NotImplemented);
        };

        let uids = self
            .eutils
            .esearch("gds", &format!("{}[ACCN]", accession), 5)
            .await?;
        let records: Vec<SourceRecord> = self
            .summaries(&uids)
            .await?
            .into_iter()
            .filter(|r| r.data().ids.accession.as_deref() == Some(accession.as_str()))
            .collect();

        if records.is_empty() {
            return Err(SourceError::NotFound(identifier.to_string()));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RetryConfig;
    use mockito::Matcher;

    const ESUMMARY_JSON: &str = r#"{
      "header": {"type": "esummary", "version": "0.3"},
      "result": {
        "uids": ["200100003", "200100004"],
        "200100003": {
          "uid": "200100003",
          "accession": "GSE100003",
          "title": "RNA-seq of breast cancer tumours",
          "summary": "Expression profiling of 12 tumours.",
          "taxon": "Homo sapiens",
          "gdstype": "Expression profiling by high throughput sequencing",
          "n_samples": 12,
          "pdat": "2019/08/01",
          "entrytype": "GSE",
          "pubmedids": [31452104]
        },
        "200100004": {
          "uid": "200100004",
          "accession": "GSE100004",
          "title": "Small pilot",
          "summary": "",
          "taxon": "Homo sapiens",
          "gdstype": "Expression profiling by array",
          "n_samples": 2,
          "pdat": "2017/01/15",
          "entrytype": "GSE",
          "pubmedids": []
        }
      }
    }"#;

    fn source(url: &str) -> GeoSource {
        let http = HttpClient::builder().retry(RetryConfig::none()).build();
        GeoSource::new(http, None).with_base_url(url)
    }

    #[test]
    fn test_parse_summaries() {
        let doc: serde_json::Value = serde_json::from_str(ESUMMARY_JSON).unwrap();
        let records = parse_summaries(&doc).unwrap();
        assert_eq!(records.len(), 2);

        let first = records[0].data();
        assert_eq!(first.ids.accession.as_deref(), Some("GSE100003"));
        assert_eq!(first.organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(first.sample_count, Some(12));
        assert_eq!(first.year, Some(2019));
        assert_eq!(first.metadata["pubmed_ids"][0], "31452104");
    }

    #[test]
    fn test_build_term() {
        let mut query = SourceQuery::plain("breast cancer", 10);
        query.filters.organism = Some("Homo sapiens".to_string());
        assert_eq!(
            GeoSource::build_term(&query),
            "(breast cancer) AND \"Homo sapiens\"[Organism] AND gse[Entry Type]"
        );
    }

    #[tokio::test]
    async fn test_search_applies_min_samples() {
        let mut server = mockito::Server::new_async().await;
        let _esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::UrlEncoded("db".into(), "gds".into()))
            .with_body("<eSearchResult><IdList><Id>200100003</Id><Id>200100004</Id></IdList></eSearchResult>")
            .create_async()
            .await;
        let _esummary = server
            .mock("GET", "/esummary.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), "200100003,200100004".into()))
            .with_header("content-type", "application/json")
            .with_body(ESUMMARY_JSON)
            .create_async()
            .await;

        let mut query = SourceQuery::plain("breast cancer", 10);
        query.filters.min_samples = Some(10);
        let records = source(&server.url()).search(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data().source_id, "GSE100003");
    }

    #[tokio::test]
    async fn test_lookup_by_accession() {
        let mut server = mockito::Server::new_async().await;
        let esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::UrlEncoded("term".into(), "GSE100003[ACCN]".into()))
            .with_body("<eSearchResult><IdList><Id>200100003</Id><Id>200100004</Id></IdList></eSearchResult>")
            .create_async()
            .await;
        let _esummary = server
            .mock("GET", "/esummary.fcgi")
            .match_query(Matcher::Any)
            .with_body(ESUMMARY_JSON)
            .create_async()
            .await;

        let id = Identifier::accession("GSE100003").unwrap();
        let records = source(&server.url()).lookup(&id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data().title, "RNA-seq of breast cancer tumours");
        esearch.assert_async().await;
    }
}
