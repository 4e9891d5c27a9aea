//! Cross-source deduplication.
//!
//! Records are grouped into connected components: an edge joins two records
//! of the same kind when they share a normalized strong identifier or when
//! their fuzzy title/author score reaches the configured threshold. A fuzzy
//! edge is never drawn between components whose identifiers of the same kind
//! disagree, so two series with the same title keep separate accessions. Components
//! are computed with union-find over the whole member set, so the grouping
//! depends only on which records are present, never on their order.
//!
//! Within a component each scalar field is taken from the most trusted member
//! that has a value, with ties broken by `(source, source_id)`.

use std::collections::{BTreeSet, HashMap, HashSet};
use strsim::jaro_winkler;

use crate::config::{ConfigError, DedupConfig};
use crate::models::{
    CanonicalRecord, Identifier, IdentifierKind, RecordKind, RecordQuality, SourceRecord,
};

/// Weight of title overlap in the fuzzy score when both sides name authors
const TITLE_WEIGHT: f64 = 0.85;

/// Merges provider records into canonical records
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
    quality_order: Vec<RecordQuality>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            threshold: 0.92,
            quality_order: vec![
                RecordQuality::StructuredXml,
                RecordQuality::Html,
                RecordQuality::AggregatorMetadata,
                RecordQuality::Scraped,
            ],
        }
    }
}

impl Deduplicator {
    pub fn new(threshold: f64, quality_order: Vec<RecordQuality>) -> Self {
        Self {
            threshold,
            quality_order,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.similarity_threshold,
            config.parsed_quality_order()?,
        ))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Merge provider records into canonical records, sorted by smallest member key
    pub fn merge(&self, records: Vec<SourceRecord>) -> Vec<CanonicalRecord> {
        let members = normalize_members(records);
        if members.is_empty() {
            return Vec::new();
        }

        let mut groups = UnionFind::new(members.len());
        self.link_shared_identifiers(&members, &mut groups);
        self.link_similar_titles(&members, &mut groups);

        let mut components: HashMap<usize, Vec<SourceRecord>> = HashMap::new();
        // Members are sorted, so each component's records stay sorted
        for (i, record) in members.into_iter().enumerate() {
            components.entry(groups.find(i)).or_default().push(record);
        }

        let mut merged: Vec<CanonicalRecord> = components
            .into_values()
            .map(|members| self.build(members))
            .collect();
        merged.sort_by(|a, b| a.members[0].key().cmp(&b.members[0].key()));

        tracing::debug!("Merged records into {} canonical records", merged.len());
        merged
    }

    /// Re-merge canonical records by flattening their members.
    ///
    /// `merge_canonical(merge(r)) == merge(r)` and merging in any grouping
    /// gives the same result as merging everything at once.
    pub fn merge_canonical(&self, records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
        self.merge(records.into_iter().flat_map(|r| r.members).collect())
    }

    fn link_shared_identifiers(&self, members: &[SourceRecord], groups: &mut UnionFind) {
        let mut first_seen: HashMap<(RecordKind, Identifier), usize> = HashMap::new();
        for (i, record) in members.iter().enumerate() {
            for id in record.identifiers() {
                match first_seen.get(&(record.kind(), id.clone())) {
                    Some(&j) => groups.union(i, j),
                    None => {
                        first_seen.insert((record.kind(), id), i);
                    }
                }
            }
        }
    }

    fn link_similar_titles(&self, members: &[SourceRecord], groups: &mut UnionFind) {
        let features: Vec<TitleFeatures> = members.iter().map(TitleFeatures::of).collect();
        // Identifiers held by each component, keyed by its root
        let mut held: HashMap<usize, BTreeSet<Identifier>> = HashMap::new();
        let none = BTreeSet::new();
        for (i, record) in members.iter().enumerate() {
            held.entry(groups.find(i)).or_default().extend(record.identifiers());
        }

        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (ri, rj) = (groups.find(i), groups.find(j));
                if members[i].kind() != members[j].kind() || ri == rj {
                    continue;
                }
                let (a, b) = (held.get(&ri).unwrap_or(&none), held.get(&rj).unwrap_or(&none));
                if identifiers_conflict(a, b) {
                    continue;
                }
                if features[i].similarity(&features[j]) >= self.threshold {
                    groups.union(i, j);
                    let mut ids = held.remove(&ri).unwrap_or_default();
                    ids.extend(held.remove(&rj).unwrap_or_default());
                    held.insert(groups.find(i), ids);
                }
            }
        }
    }

    /// Fuzzy identity score of two records in [0, 1]
    pub fn similarity(a: &SourceRecord, b: &SourceRecord) -> f64 {
        TitleFeatures::of(a).similarity(&TitleFeatures::of(b))
    }

    fn quality_rank(&self, quality: RecordQuality) -> usize {
        self.quality_order
            .iter()
            .position(|q| *q == quality)
            .unwrap_or(self.quality_order.len())
    }

    fn build(&self, members: Vec<SourceRecord>) -> CanonicalRecord {
        let mut by_trust: Vec<&SourceRecord> = members.iter().collect();
        by_trust.sort_by(|a, b| {
            self.quality_rank(a.data().quality)
                .cmp(&self.quality_rank(b.data().quality))
                .then_with(|| a.key().cmp(&b.key()))
        });

        let pick_str = |field: fn(&SourceRecord) -> &str| -> String {
            by_trust
                .iter()
                .map(|r| field(r).trim())
                .find(|v| !v.is_empty())
                .unwrap_or_default()
                .to_string()
        };
        let pick_opt = |field: fn(&SourceRecord) -> Option<&String>| -> Option<String> {
            by_trust
                .iter()
                .filter_map(|r| field(r))
                .find(|v| !v.trim().is_empty())
                .cloned()
        };

        let title = pick_str(|r| r.data().title.as_str());
        let summary = pick_str(|r| r.data().summary.as_str());
        let organism = pick_opt(|r| r.data().organism.as_ref());
        let record_type = pick_opt(|r| r.data().record_type.as_ref());
        let url = pick_opt(|r| r.data().url.as_ref());
        let year = by_trust.iter().find_map(|r| r.data().year);
        let sample_count = by_trust.iter().find_map(|r| r.data().sample_count);
        let authors = by_trust
            .iter()
            .map(|r| &r.data().authors)
            .find(|a| !a.is_empty())
            .cloned()
            .unwrap_or_default();

        let identifiers: BTreeSet<Identifier> =
            members.iter().flat_map(|r| r.identifiers()).collect();
        let sources: Vec<String> = members
            .iter()
            .map(|r| r.data().source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        CanonicalRecord {
            kind: members[0].kind(),
            identifiers,
            title,
            summary,
            authors,
            year,
            organism,
            record_type,
            sample_count,
            url,
            sources,
            members,
            score: 0.0,
            breakdown: Vec::new(),
        }
    }
}

/// Sort by `(source, source_id)` and keep one record per key
fn normalize_members(records: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut members: Vec<SourceRecord> = records.into_iter().filter(|r| r.is_valid()).collect();
    members.sort_by(|a, b| a.key().cmp(&b.key()));

    let mut seen = HashSet::new();
    members.retain(|r| seen.insert(r.key()));
    members
}

/// True when both sides carry an identifier of some kind and share none of that kind
fn identifiers_conflict(a: &BTreeSet<Identifier>, b: &BTreeSet<Identifier>) -> bool {
    let kinds: BTreeSet<IdentifierKind> = a.iter().map(Identifier::kind).collect();
    kinds.into_iter().any(|kind| {
        let theirs: Vec<&Identifier> = b.iter().filter(|id| id.kind() == kind).collect();
        !theirs.is_empty() && !theirs.iter().any(|id| a.contains(*id))
    })
}

/// Title tokens and first-author surname, precomputed for pairwise scoring
struct TitleFeatures {
    tokens: HashSet<String>,
    surname: Option<String>,
}

impl TitleFeatures {
    fn of(record: &SourceRecord) -> Self {
        let data = record.data();
        Self {
            tokens: title_tokens(&data.title),
            surname: data.authors.first().and_then(|a| surname(a)),
        }
    }

    fn similarity(&self, other: &Self) -> f64 {
        if self.tokens.is_empty() || other.tokens.is_empty() {
            return 0.0;
        }
        let shared = self.tokens.intersection(&other.tokens).count() as f64;
        let union = self.tokens.union(&other.tokens).count() as f64;
        let jaccard = shared / union;

        match (&self.surname, &other.surname) {
            (Some(a), Some(b)) => {
                TITLE_WEIGHT * jaccard + (1.0 - TITLE_WEIGHT) * jaro_winkler(a, b)
            }
            _ => jaccard,
        }
    }
}

/// Normalize a title for comparison
fn title_tokens(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Lowercased surname from "Jane Doe", "Doe J" or "Doe, Jane"
fn surname(author: &str) -> Option<String> {
    let author = author.trim();
    if let Some((last, _)) = author.split_once(',') {
        return Some(last.trim().to_lowercase()).filter(|s| !s.is_empty());
    }

    let tokens: Vec<&str> = author.split_whitespace().collect();
    let last = *tokens.last()?;
    let is_initials = tokens.len() > 1
        && last.len() <= 3
        && last.chars().all(|c| c.is_uppercase() || c == '.');
    let name = if is_initials { tokens[0] } else { last };
    Some(name.to_lowercase())
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// The smaller root wins, keeping roots stable for a fixed member order
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}
