//! Deduplicated records and their ranking explanation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::query::{Identifier, IdentifierKind};
use super::record::{RecordKind, SourceRecord};

/// One factor's contribution to a record's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    /// Factor name (e.g. "title_overlap")
    pub factor: String,

    /// Raw factor value in [0, 1]
    pub value: f64,

    /// Configured weight
    pub weight: f64,

    /// `value * weight`
    pub contribution: f64,
}

/// The merged representation of one logical entity across providers.
///
/// Scalar fields are derived from `members`; a canonical record is fully
/// determined by its member set, which is what makes re-merging a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub kind: RecordKind,

    /// Union of every member's strong identifiers
    pub identifiers: BTreeSet<Identifier>,

    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub organism: Option<String>,
    pub record_type: Option<String>,
    pub sample_count: Option<u32>,
    pub url: Option<String>,

    /// Provider ids that contributed, sorted
    pub sources: Vec<String>,

    /// Original provider records, sorted and unique by `(source, source_id)`
    pub members: Vec<SourceRecord>,

    /// Ranking score (0 until ranked)
    #[serde(default)]
    pub score: f64,

    /// Per-factor explanation of `score`
    #[serde(default)]
    pub breakdown: Vec<FactorScore>,
}

impl CanonicalRecord {
    pub fn doi(&self) -> Option<&str> {
        self.first_of(|id| matches!(id, Identifier::Doi(_)))
    }

    pub fn pmid(&self) -> Option<&str> {
        self.first_of(|id| matches!(id, Identifier::Pmid(_)))
    }

    pub fn pmc_id(&self) -> Option<&str> {
        self.first_of(|id| matches!(id, Identifier::PmcId(_)))
    }

    pub fn accession(&self) -> Option<&str> {
        self.first_of(|id| matches!(id, Identifier::Accession(_)))
    }

    fn first_of(&self, pred: impl Fn(&Identifier) -> bool) -> Option<&str> {
        self.identifiers.iter().find(|id| pred(id)).map(|id| id.value())
    }

    /// Preferred identifier for keys and artifact names: PMC id, PMID, DOI, accession
    pub fn primary_identifier(&self) -> Option<Identifier> {
        const ORDER: [IdentifierKind; 4] = [
            IdentifierKind::PmcId,
            IdentifierKind::Pmid,
            IdentifierKind::Doi,
            IdentifierKind::Accession,
        ];
        ORDER
            .iter()
            .find_map(|kind| self.identifiers.iter().find(|id| id.kind() == *kind))
            .cloned()
    }

    /// Minimal publication record built from a bare identifier.
    ///
    /// Used when the caller only knows an identifier and wants full text.
    pub fn from_identifier(identifier: Identifier) -> Self {
        let mut identifiers = BTreeSet::new();
        identifiers.insert(identifier);
        Self {
            kind: RecordKind::Publication,
            identifiers,
            title: String::new(),
            summary: String::new(),
            authors: Vec::new(),
            year: None,
            organism: None,
            record_type: None,
            sample_count: None,
            url: None,
            sources: Vec::new(),
            members: Vec::new(),
            score: 0.0,
            breakdown: Vec::new(),
        }
    }

    /// Human-readable breakdown, e.g. `0.612 = title_overlap 0.400 + recency 0.212`
    pub fn explain(&self) -> String {
        if self.breakdown.is_empty() {
            return format!("{:.3}", self.score);
        }

        let parts: Vec<String> = self
            .breakdown
            .iter()
            .map(|f| format!("{} {:.3}", f.factor, f.contribution))
            .collect();
        format!("{:.3} = {}", self.score, parts.join(" + "))
    }
}
