//! Query optimization and expansion.
//!
//! [`QueryOptimizer`] asks an [`EntityExtractor`] for typed entities, then
//! rebuilds the query with provider field tags while OR-ing in the raw text,
//! so an optimized query never matches less than the original. Extraction is
//! best-effort: on error or timeout the raw query passes through unchanged.

mod lexicon;

pub use lexicon::LexiconExtractor;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use crate::config::OptimizerConfig;
use crate::models::Query;

/// Entity categories understood by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Disease,
    Gene,
    Organism,
    Assay,
    Chemical,
    Tissue,
    CellType,
    Other,
}

static FIELD_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z][A-Za-z ]*)\]").expect("valid field tag regex"));

/// Strip the field tags a provider does not index, leaving the bare terms.
///
/// Tags are written for the GEO DataSets index; `[DataSet Type]` and
/// `[Organism]` mean nothing to PubMed.
pub fn retain_field_tags(query: &str, known: &[&str]) -> String {
    FIELD_TAG_RE
        .replace_all(query, |caps: &regex::Captures| {
            if known.iter().any(|tag| tag.eq_ignore_ascii_case(&caps[1])) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

impl EntityType {
    /// E-utilities field tag for this entity type, if it has one
    pub fn field_tag(&self) -> Option<&'static str> {
        match self {
            EntityType::Disease => Some("MeSH Terms"),
            EntityType::Gene => Some("Gene Name"),
            EntityType::Organism => Some("Organism"),
            EntityType::Assay => Some("DataSet Type"),
            EntityType::Chemical => Some("Substance Name"),
            EntityType::Tissue | EntityType::CellType | EntityType::Other => None,
        }
    }
}

/// An entity mention found in query text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,

    /// Surface text as it appeared in the query
    pub text: String,

    /// Ontology identifier (e.g. "MESH:D001943", "NCBITaxon:9606")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,

    /// Alternative names, best first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

impl ExtractedEntity {
    pub fn new(entity_type: EntityType, text: impl Into<String>) -> Self {
        Self {
            entity_type,
            text: text.into(),
            canonical_id: None,
            synonyms: Vec::new(),
        }
    }

    pub fn with_canonical_id(mut self, id: impl Into<String>) -> Self {
        self.canonical_id = Some(id.into());
        self
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    /// The entity rendered with its provider field tag
    fn tagged(&self) -> String {
        let term = quote_term(&self.text);
        match self.entity_type.field_tag() {
            Some(tag) => format!("{}[{}]", term, tag),
            None => term,
        }
    }
}

fn quote_term(term: &str) -> String {
    if term.contains(char::is_whitespace) {
        format!("\"{}\"", term)
    } else {
        term.to_string()
    }
}

/// Errors an entity extractor can report
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("Entity extractor unavailable: {0}")]
    Unavailable(String),

    #[error("Entity extraction failed: {0}")]
    Failed(String),
}

/// Opaque NLP collaborator that finds typed entities in text
#[async_trait]
pub trait EntityExtractor: Send + Sync + std::fmt::Debug {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractorError>;
}

/// Extractor that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExtractor;

#[async_trait]
impl EntityExtractor for NoopExtractor {
    async fn extract(&self, _text: &str) -> Result<Vec<ExtractedEntity>, ExtractorError> {
        Ok(Vec::new())
    }
}

/// Output of [`QueryOptimizer::optimize`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptimizationResult {
    /// Never empty
    pub primary_query: String,

    /// Alternative queries, best first; may be empty
    pub variants: Vec<String>,

    pub entities: BTreeMap<EntityType, BTreeSet<ExtractedEntity>>,
}

impl QueryOptimizationResult {
    /// The raw query, unchanged
    pub fn passthrough(raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            primary_query: if raw.is_empty() {
                "*".to_string()
            } else {
                raw.to_string()
            },
            variants: Vec::new(),
            entities: BTreeMap::new(),
        }
    }

    /// All entities, by type then text
    pub fn all_entities(&self) -> impl Iterator<Item = &ExtractedEntity> {
        self.entities.values().flat_map(|set| set.iter())
    }

    pub fn is_optimized(&self) -> bool {
        !self.entities.is_empty()
    }
}

/// Builds optimized queries from raw ones
#[derive(Debug, Clone)]
pub struct QueryOptimizer {
    extractor: Arc<dyn EntityExtractor>,
    config: OptimizerConfig,
}

impl QueryOptimizer {
    pub fn new(extractor: Arc<dyn EntityExtractor>, config: OptimizerConfig) -> Self {
        Self { extractor, config }
    }

    /// Optimizer backed by the built-in lexicon
    pub fn with_lexicon(config: OptimizerConfig) -> Self {
        Self::new(Arc::new(LexiconExtractor::new()), config)
    }

    /// Optimize a query. Never fails: extractor problems degrade to the raw query.
    #[tracing::instrument(skip(self, query), fields(query = %query.text()))]
    pub async fn optimize(&self, query: &Query) -> QueryOptimizationResult {
        let raw = query.text().trim();
        if raw.is_empty() || !self.config.enabled {
            return QueryOptimizationResult::passthrough(raw);
        }

        let extracted =
            match tokio::time::timeout(self.config.timeout(), self.extractor.extract(raw)).await {
                Ok(Ok(entities)) => entities,
                Ok(Err(e)) => {
                    tracing::warn!("Entity extraction failed, using raw query: {}", e);
                    return QueryOptimizationResult::passthrough(raw);
                }
                Err(_) => {
                    tracing::warn!(
                        "Entity extraction timed out after {:?}, using raw query",
                        self.config.timeout()
                    );
                    return QueryOptimizationResult::passthrough(raw);
                }
            };

        let entities = group_entities(extracted);
        if entities.is_empty() {
            return QueryOptimizationResult::passthrough(raw);
        }

        let ordered: Vec<&ExtractedEntity> = entities.values().flat_map(|s| s.iter()).collect();
        let primary_query = build_primary(raw, &ordered);
        let variants = build_variants(raw, &primary_query, &ordered, self.config.max_variants);

        tracing::debug!(
            "Optimized query with {} entities and {} variants",
            ordered.len(),
            variants.len()
        );

        QueryOptimizationResult {
            primary_query,
            variants,
            entities,
        }
    }
}

/// Group by type, dropping blank and case-insensitive duplicate mentions
fn group_entities(
    extracted: Vec<ExtractedEntity>,
) -> BTreeMap<EntityType, BTreeSet<ExtractedEntity>> {
    let mut seen = BTreeSet::new();
    let mut grouped: BTreeMap<EntityType, BTreeSet<ExtractedEntity>> = BTreeMap::new();

    for mut entity in extracted {
        entity.text = entity.text.trim().to_string();
        if entity.text.is_empty() {
            continue;
        }
        if !seen.insert((entity.entity_type, entity.text.to_lowercase())) {
            continue;
        }
        grouped.entry(entity.entity_type).or_default().insert(entity);
    }
    grouped
}

/// `(<tagged AND clause>) OR (<raw>)`
fn build_primary(raw: &str, entities: &[&ExtractedEntity]) -> String {
    let clause = entities
        .iter()
        .map(|e| e.tagged())
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("({}) OR ({})", clause, raw)
}

fn build_variants(
    raw: &str,
    primary: &str,
    entities: &[&ExtractedEntity],
    max_variants: usize,
) -> Vec<String> {
    let mut candidates = Vec::new();

    // Canonical ids substituted for every entity that has one
    if entities.iter().any(|e| e.canonical_id.is_some()) {
        let mut text = raw.to_string();
        for entity in entities {
            if let Some(id) = &entity.canonical_id {
                text = replace_term(&text, &entity.text, id);
            }
        }
        candidates.push(text);
    }

    for entity in entities {
        for synonym in &entity.synonyms {
            candidates.push(replace_term(raw, &entity.text, synonym));
        }
    }

    if entities.len() > 1 {
        candidates.push(
            entities
                .iter()
                .map(|e| quote_term(&e.text))
                .collect::<Vec<_>>()
                .join(" AND "),
        );
    }

    let mut seen = BTreeSet::new();
    seen.insert(primary.to_lowercase());
    seen.insert(raw.to_lowercase());

    candidates
        .into_iter()
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
        .take(max_variants)
        .collect()
}

/// Case-insensitive whole-term replacement
fn replace_term(text: &str, term: &str, replacement: &str) -> String {
    let pattern = format!(r"(?i)(^|[^\w]){}($|[^\w])", regex::escape(term));
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(text, |caps: &regex::Captures| {
                format!("{}{}{}", &caps[1], replacement, &caps[2])
            })
            .into_owned(),
        Err(_) => text.to_string(),
    }
}
