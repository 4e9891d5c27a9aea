//! Records returned by individual providers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::query::Identifier;

/// Whether a record describes a dataset or a publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Dataset,
    Publication,
}

/// How trustworthy a provider's field values are.
///
/// Used by the deduplicator to choose scalar fields when records disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordQuality {
    StructuredXml,
    Html,
    AggregatorMetadata,
    Scraped,
}

impl RecordQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordQuality::StructuredXml => "structured_xml",
            RecordQuality::Html => "html",
            RecordQuality::AggregatorMetadata => "aggregator_metadata",
            RecordQuality::Scraped => "scraped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "structured_xml" | "xml" => Some(RecordQuality::StructuredXml),
            "html" => Some(RecordQuality::Html),
            "aggregator_metadata" | "aggregator" => Some(RecordQuality::AggregatorMetadata),
            "scraped" => Some(RecordQuality::Scraped),
            _ => None,
        }
    }
}

/// Cross-reference identifiers a record may carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRefIds {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmc_id: Option<String>,
    pub accession: Option<String>,
}

impl CrossRefIds {
    /// Normalized strong identifiers; unparseable values are dropped
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut ids = Vec::new();
        if let Some(id) = self.doi.as_deref().and_then(Identifier::doi) {
            ids.push(id);
        }
        if let Some(id) = self.pmid.as_deref().and_then(Identifier::pmid) {
            ids.push(id);
        }
        if let Some(id) = self.pmc_id.as_deref().and_then(Identifier::pmcid) {
            ids.push(id);
        }
        if let Some(id) = self.accession.as_deref().and_then(Identifier::accession) {
            ids.push(id);
        }
        ids
    }

    pub fn is_empty(&self) -> bool {
        [&self.doi, &self.pmid, &self.pmc_id, &self.accession]
            .iter()
            .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

/// Payload shared by datasets and publications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    /// Provider id that produced the record (e.g. "geo", "pubmed")
    pub source: String,

    /// Provider-scoped identifier
    pub source_id: String,

    /// Cross-reference identifiers
    #[serde(default)]
    pub ids: CrossRefIds,

    pub title: String,

    #[serde(default)]
    pub summary: String,

    /// Author names in publication order
    #[serde(default)]
    pub authors: Vec<String>,

    pub year: Option<i32>,

    pub organism: Option<String>,

    /// Study or publication type
    pub record_type: Option<String>,

    pub sample_count: Option<u32>,

    /// Landing page URL
    pub url: Option<String>,

    pub quality: RecordQuality,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A record from one provider, before merging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum SourceRecord {
    Dataset(RecordData),
    Publication(RecordData),
}

impl SourceRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            SourceRecord::Dataset(_) => RecordKind::Dataset,
            SourceRecord::Publication(_) => RecordKind::Publication,
        }
    }

    pub fn data(&self) -> &RecordData {
        match self {
            SourceRecord::Dataset(d) | SourceRecord::Publication(d) => d,
        }
    }

    pub fn into_data(self) -> RecordData {
        match self {
            SourceRecord::Dataset(d) | SourceRecord::Publication(d) => d,
        }
    }

    /// `(source, source_id)`, unique per provider record
    pub fn key(&self) -> (String, String) {
        let data = self.data();
        (data.source.clone(), data.source_id.clone())
    }

    /// Normalized strong identifiers of this record
    pub fn identifiers(&self) -> BTreeSet<Identifier> {
        self.data().ids.identifiers().into_iter().collect()
    }

    /// A record must carry at least one identifier
    pub fn is_valid(&self) -> bool {
        let data = self.data();
        !data.ids.is_empty() || !data.source_id.trim().is_empty()
    }
}

/// Builder for constructing records in providers and tests
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    kind: RecordKind,
    data: RecordData,
}

impl RecordBuilder {
    /// Create a new builder with required fields
    pub fn new(
        kind: RecordKind,
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            data: RecordData {
                source: source.into(),
                source_id: source_id.into(),
                ids: CrossRefIds::default(),
                title: title.into(),
                summary: String::new(),
                authors: Vec::new(),
                year: None,
                organism: None,
                record_type: None,
                sample_count: None,
                url: None,
                quality: RecordQuality::AggregatorMetadata,
                metadata: serde_json::Value::Null,
            },
        }
    }

    pub fn dataset(
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(RecordKind::Dataset, source, source_id, title)
    }

    pub fn publication(
        source: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::new(RecordKind::Publication, source, source_id, title)
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.data.ids.doi = non_empty(doi.into());
        self
    }

    pub fn pmid(mut self, pmid: impl Into<String>) -> Self {
        self.data.ids.pmid = non_empty(pmid.into());
        self
    }

    pub fn pmc_id(mut self, pmc_id: impl Into<String>) -> Self {
        self.data.ids.pmc_id = non_empty(pmc_id.into());
        self
    }

    pub fn accession(mut self, accession: impl Into<String>) -> Self {
        self.data.ids.accession = non_empty(accession.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.data.summary = summary.into();
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.authors = authors
            .into_iter()
            .map(Into::into)
            .filter(|a: &String| !a.trim().is_empty())
            .collect();
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.data.year = Some(year);
        self
    }

    pub fn organism(mut self, organism: impl Into<String>) -> Self {
        self.data.organism = non_empty(organism.into());
        self
    }

    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.data.record_type = non_empty(record_type.into());
        self
    }

    pub fn sample_count(mut self, count: u32) -> Self {
        self.data.sample_count = Some(count);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.data.url = non_empty(url.into());
        self
    }

    pub fn quality(mut self, quality: RecordQuality) -> Self {
        self.data.quality = quality;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.data.metadata = metadata;
        self
    }

    pub fn build(self) -> SourceRecord {
        match self.kind {
            RecordKind::Dataset => SourceRecord::Dataset(self.data),
            RecordKind::Publication => SourceRecord::Publication(self.data),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
