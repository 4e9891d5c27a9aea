//! Query, identifier and result-limit models.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{
    is_accession, normalize_accession, normalize_doi, normalize_pmcid, normalize_pmid,
};

/// Structured filters attached to a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Organism filter (e.g. "Homo sapiens")
    pub organism: Option<String>,

    /// Record/study type filter (e.g. "Expression profiling by high throughput sequencing")
    pub record_type: Option<String>,

    /// Minimum number of samples a dataset must report
    pub min_samples: Option<u32>,
}

impl QueryFilters {
    /// True when no filter is set
    pub fn is_empty(&self) -> bool {
        self.organism.is_none() && self.record_type.is_none() && self.min_samples.is_none()
    }
}

/// A search issued by a caller.
///
/// Immutable once built: the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    text: String,
    #[serde(default)]
    filters: QueryFilters,
}

impl Query {
    /// Create a new query from raw text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            filters: QueryFilters::default(),
        }
    }

    /// Set the organism filter
    pub fn organism(mut self, organism: impl Into<String>) -> Self {
        self.filters.organism = Some(organism.into());
        self
    }

    /// Set the record type filter
    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.filters.record_type = Some(record_type.into());
        self
    }

    /// Set the minimum sample count
    pub fn min_samples(mut self, min: u32) -> Self {
        self.filters.min_samples = Some(min);
        self
    }

    /// Same filters, different text
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            filters: self.filters.clone(),
        }
    }

    /// Raw query text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Structured filters
    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    /// Lowercased, whitespace-collapsed query text plus filters.
    ///
    /// Two queries that differ only in case or spacing normalize identically.
    pub fn normalized(&self) -> String {
        let text = self
            .text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let organism = self
            .filters
            .organism
            .as_deref()
            .map(|o| o.trim().to_lowercase())
            .unwrap_or_default();
        let record_type = self
            .filters
            .record_type
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .unwrap_or_default();
        let min_samples = self
            .filters
            .min_samples
            .map(|m| m.to_string())
            .unwrap_or_default();

        format!("{}|{}|{}|{}", text, organism, record_type, min_samples)
    }
}

/// How many results the caller wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultLimits {
    /// Maximum datasets in the result
    pub max_datasets: usize,

    /// Maximum publications in the result
    pub max_publications: usize,

    /// How many records to request from each provider
    pub per_source: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_datasets: 20,
            max_publications: 20,
            per_source: 25,
        }
    }
}

impl ResultLimits {
    /// Create limits with the same cap for datasets and publications
    pub fn new(max: usize) -> Self {
        Self {
            max_datasets: max,
            max_publications: max,
            per_source: max.max(1),
        }
    }

    /// Set the per-source request size
    pub fn per_source(mut self, per_source: usize) -> Self {
        self.per_source = per_source.max(1);
        self
    }
}

/// Kind of strong identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Doi,
    Pmid,
    PmcId,
    Accession,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Doi => "doi",
            IdentifierKind::Pmid => "pmid",
            IdentifierKind::PmcId => "pmcid",
            IdentifierKind::Accession => "accession",
        }
    }
}

/// A normalized strong identifier.
///
/// Constructed only through the normalizing constructors, so two
/// `Identifier`s compare equal exactly when they name the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    Doi(String),
    Pmid(String),
    PmcId(String),
    Accession(String),
}

impl Identifier {
    pub fn doi(raw: &str) -> Option<Self> {
        normalize_doi(raw).ok().map(Identifier::Doi)
    }

    pub fn pmid(raw: &str) -> Option<Self> {
        normalize_pmid(raw).ok().map(Identifier::Pmid)
    }

    pub fn pmcid(raw: &str) -> Option<Self> {
        normalize_pmcid(raw).ok().map(Identifier::PmcId)
    }

    pub fn accession(raw: &str) -> Option<Self> {
        normalize_accession(raw).ok().map(Identifier::Accession)
    }

    /// Recognise a single token as an identifier.
    ///
    /// Bare numbers are read as PMIDs only when they have six to nine
    /// digits; shorter numbers are too ambiguous in free text.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().trim_end_matches(['.', ',', ';']);
        if token.is_empty() {
            return None;
        }

        let lower = token.to_lowercase();
        if lower.starts_with("10.") || lower.starts_with("doi:") || lower.contains("doi.org/") {
            return Self::doi(token);
        }

        if lower.starts_with("pmc") {
            return Self::pmcid(token);
        }

        if lower.starts_with("pmid") {
            return Self::pmid(token);
        }

        if is_accession(token) {
            return Self::accession(token);
        }

        if (6..=9).contains(&token.len()) && token.chars().all(|c| c.is_ascii_digit()) {
            return Self::pmid(token);
        }

        None
    }

    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Doi(_) => IdentifierKind::Doi,
            Identifier::Pmid(_) => IdentifierKind::Pmid,
            Identifier::PmcId(_) => IdentifierKind::PmcId,
            Identifier::Accession(_) => IdentifierKind::Accession,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identifier::Doi(v)
            | Identifier::Pmid(v)
            | Identifier::PmcId(v)
            | Identifier::Accession(v) => v,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.value())
    }
}

/// How a query should be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryKind {
    /// The whole query is one known identifier
    IdentifierLookup { identifier: Identifier },

    /// Free-text keyword search
    Keyword,

    /// Identifiers mixed with free text
    Hybrid {
        identifiers: Vec<Identifier>,
        remainder: String,
    },
}
