//! Core data models for queries, provider records, merged records and full text.

mod canonical;
mod fulltext;
mod query;
mod record;
mod search;

pub use canonical::{CanonicalRecord, FactorScore};
pub use fulltext::{
    ArtifactRecord, Author, ContentType, FetchFormat, Figure, FullTextContent, FullTextResult,
    Reference, Section, Table, TierLevel,
};
pub use query::{Identifier, IdentifierKind, Query, QueryFilters, QueryKind, ResultLimits};
pub use record::{CrossRefIds, RecordBuilder, RecordData, RecordKind, RecordQuality, SourceRecord};
pub use search::{AttemptOperation, FailureReason, SearchResult, SourceAttempt};
