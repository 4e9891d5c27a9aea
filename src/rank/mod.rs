//! Relevance ranking of canonical records.
//!
//! Every factor is a pure function of the record, the query and the batch,
//! valued in [0, 1]. A record's score is the weighted sum of its factors and
//! the breakdown lists each contribution, so a ranking can always be explained.

use chrono::Datelike;
use std::collections::{BTreeSet, HashSet};

use crate::config::{RankConfig, RankWeights};
use crate::models::{CanonicalRecord, FactorScore, Query, RecordKind};

/// Sample count at which the sample factor saturates
const SAMPLE_SATURATION: f64 = 1000.0;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "by", "for", "from", "in", "is", "of", "on", "or", "the", "to", "with",
];

/// Scores and orders canonical records against a query
#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankWeights,
    half_life_years: f64,
    reference_year: i32,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(&RankConfig::default())
    }
}

impl Ranker {
    pub fn new(config: &RankConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            half_life_years: config.recency_half_life_years,
            reference_year: chrono::Utc::now().year(),
        }
    }

    /// Fix the year recency is measured from
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    /// Score every record and sort descending. Equal scores keep input order.
    pub fn rank(&self, mut records: Vec<CanonicalRecord>, query: &Query) -> Vec<CanonicalRecord> {
        let query_terms = tokens(query.text());
        let batch_sources = records
            .iter()
            .flat_map(|r| r.sources.iter())
            .collect::<BTreeSet<_>>()
            .len();

        for record in records.iter_mut() {
            let breakdown = self.factors(record, query, &query_terms, batch_sources);
            record.score = breakdown.iter().map(|f| f.contribution).sum();
            record.breakdown = breakdown;
        }

        records.sort_by(|a, b| b.score.total_cmp(&a.score));
        records
    }

    fn factors(
        &self,
        record: &CanonicalRecord,
        query: &Query,
        query_terms: &HashSet<String>,
        batch_sources: usize,
    ) -> Vec<FactorScore> {
        let w = &self.weights;
        let filters = query.filters();
        let mut out = Vec::new();
        let mut push = |factor: &str, value: f64, weight: f64| {
            let value = value.clamp(0.0, 1.0);
            out.push(FactorScore {
                factor: factor.to_string(),
                value,
                weight,
                contribution: value * weight,
            });
        };

        if !query_terms.is_empty() {
            push("title_overlap", overlap(query_terms, &record.title), w.title_overlap);
            push(
                "summary_overlap",
                overlap(query_terms, &record.summary),
                w.summary_overlap,
            );
        }

        if let Some(organism) = filters.organism.as_deref() {
            push(
                "organism_match",
                matches_filter(record.organism.as_deref(), organism),
                w.organism_match,
            );
        }

        if let Some(record_type) = filters.record_type.as_deref() {
            push(
                "type_match",
                matches_filter(record.record_type.as_deref(), record_type),
                w.type_match,
            );
        }

        if record.kind == RecordKind::Dataset {
            let samples = record.sample_count.map_or(0.0, |n| {
                (1.0 + n as f64).ln() / (1.0 + SAMPLE_SATURATION).ln()
            });
            push("sample_count", samples, w.sample_count);

            if let Some(min) = filters.min_samples {
                let meets = record.sample_count.is_some_and(|n| n >= min);
                push("sample_threshold", if meets { 1.0 } else { 0.0 }, w.sample_threshold);
            }
        }

        let recency = record.year.map_or(0.0, |year| {
            let age = (self.reference_year - year).max(0) as f64;
            0.5_f64.powf(age / self.half_life_years)
        });
        push("recency", recency, w.recency);

        if batch_sources > 0 {
            push(
                "source_agreement",
                record.sources.len() as f64 / batch_sources as f64,
                w.source_agreement,
            );
        }

        out
    }
}

/// Lowercased content words
fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Fraction of query terms present in `text`
fn overlap(query_terms: &HashSet<String>, text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = tokens(text);
    let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    hits as f64 / query_terms.len() as f64
}

fn matches_filter(value: Option<&str>, filter: &str) -> f64 {
    let filter = filter.trim().to_lowercase();
    match value {
        Some(v) if !filter.is_empty() && v.to_lowercase().contains(&filter) => 1.0,
        _ => 0.0,
    }
}
