//! # bioharvest
//!
//! Multi-source search over biomedical dataset repositories and literature
//! databases, with a tiered waterfall for acquiring publication full text.
//!
//! ## Architecture
//!
//! - [`search`]: query classification, concurrent fan-out, merge and rank
//! - [`optimizer`]: biomedical entity extraction and query variants
//! - [`sources`]: provider clients behind the [`sources::SourceClient`] trait
//! - [`dedup`] / [`rank`]: canonical record merging and explainable scoring
//! - [`fulltext`]: the tier 1-4 acquisition waterfall
//! - [`fetch`] / [`extract`]: validated downloads and JATS/HTML parsing
//! - [`cache`]: single-flight TTL cache, optionally persisted
//! - [`config`]: configuration management
//! - [`utils`]: HTTP client, retry and identifier validation

pub mod cache;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod fetch;
pub mod fulltext;
pub mod models;
pub mod optimizer;
pub mod rank;
pub mod search;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use fulltext::{CancelHandle, CancelSignal, FullTextManager};
pub use models::{CanonicalRecord, FullTextResult, Query, ResultLimits, SearchResult};
pub use search::SearchOrchestrator;
pub use sources::{SourceClient, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
