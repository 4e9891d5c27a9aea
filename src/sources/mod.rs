//! Provider plugins behind a single trait-based contract.
//!
//! Every external provider (dataset registry, bibliographic index, OA
//! aggregator, preprint server, institutional proxy, mirror) implements
//! [`SourceClient`]. Each client owns its own [`HttpClient`](crate::utils::HttpClient),
//! and therefore its own rate limiter and timeout; the orchestrators only ever
//! see the trait.
//!
//! # Adding a provider
//!
//! 1. Create a struct that implements `SourceClient`
//! 2. Implement `id`, `name`, `capabilities` and the operations it advertises
//! 3. Wire it into [`SourceRegistry::from_config`] and, for full text, into the
//!    tier table in `[fulltext.tiers]`

mod biorxiv;
mod core;
mod eutils;
mod europe_pmc;
mod geo;
mod institutional;
mod mirror;
mod openalex;
mod pmc;
mod pubmed;
mod registry;
mod unpaywall;

pub mod mock;

pub use biorxiv::BiorxivSource;
pub use core::CoreSource;
pub use europe_pmc::EuropePmcSource;
pub use geo::GeoSource;
pub use institutional::{InstitutionalAccess, InstitutionalSource};
pub use mirror::MirrorSource;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use pmc::PmcSource;
pub use pubmed::PubMedSource;
pub use registry::{SourceCapabilities, SourceRegistry};
pub use unpaywall::UnpaywallSource;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    CanonicalRecord, ContentType, FetchFormat, Identifier, IdentifierKind, QueryFilters,
    RecordQuality, SourceRecord,
};

/// What a provider receives for a keyword search
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    /// Optimized query with field tags, for providers that understand them
    pub text: String,

    /// The caller's raw query text
    pub raw: String,

    /// Alternative phrasings, best first
    pub variants: Vec<String>,

    pub filters: QueryFilters,

    /// Maximum records to return
    pub max_results: usize,
}

impl SourceQuery {
    /// Query for a provider without field tags
    pub fn plain(raw: impl Into<String>, max_results: usize) -> Self {
        let raw = raw.into();
        Self {
            text: raw.clone(),
            raw,
            variants: Vec::new(),
            filters: QueryFilters::default(),
            max_results,
        }
    }
}

/// A request for one publication's content in one format
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub publication: Arc<CanonicalRecord>,
    pub format: FetchFormat,
}

impl FetchRequest {
    pub fn new(publication: Arc<CanonicalRecord>, format: FetchFormat) -> Self {
        Self {
            publication,
            format,
        }
    }

    pub fn doi(&self) -> Option<&str> {
        self.publication.doi()
    }

    pub fn pmid(&self) -> Option<&str> {
        self.publication.pmid()
    }

    pub fn pmc_id(&self) -> Option<&str> {
        self.publication.pmc_id()
    }
}

/// Raw bytes retrieved for a publication
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: ContentType,

    /// Final URL the bytes were read from
    pub url: String,
}

/// The contract every provider implements.
///
/// Operations a provider does not advertise in [`capabilities`](Self::capabilities)
/// keep their default body, which returns [`SourceError::NotImplemented`].
#[async_trait]
pub trait SourceClient: Send + Sync + std::fmt::Debug {
    /// Stable identifier (e.g. "geo", "pmc"), used in attempts and artifact paths
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    /// Trust level of the records this provider produces
    fn quality(&self) -> RecordQuality {
        RecordQuality::AggregatorMetadata
    }

    /// Whether `lookup` understands this kind of identifier
    fn supports_identifier(&self, _kind: IdentifierKind) -> bool {
        false
    }

    /// Whether this provider can address the publication in this format
    /// without a network call (e.g. it needs a DOI and the record has one)
    fn can_fetch(&self, _publication: &CanonicalRecord, _format: FetchFormat) -> bool {
        false
    }

    fn supports_search(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::SEARCH)
    }

    fn supports_lookup(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::LOOKUP)
    }

    fn supports_format(&self, format: FetchFormat) -> bool {
        match format {
            FetchFormat::Structured => self
                .capabilities()
                .contains(SourceCapabilities::FULLTEXT_STRUCTURED),
            FetchFormat::Pdf => self.capabilities().contains(SourceCapabilities::FULLTEXT_PDF),
        }
    }

    /// Keyword search
    async fn search(&self, _query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Resolve one strong identifier into records
    async fn lookup(&self, _identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Retrieve the publication's content in the requested format
    async fn fetch(&self, _request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        Err(SourceError::NotImplemented)
    }
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested operation is not implemented for this source
    #[error("Operation not implemented for this source")]
    NotImplemented,

    /// Network failure or 5xx
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// 429 or other backpressure
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed XML, JSON or HTML
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Content failed a validity check
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SourceError::Timeout(Duration::ZERO);
        }
        if err.is_decode() {
            return SourceError::Parse(err.to_string());
        }
        SourceError::SourceUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}

impl From<crate::utils::ValidationError> for SourceError {
    fn from(err: crate::utils::ValidationError) -> Self {
        SourceError::Validation(err.to_string())
    }
}
