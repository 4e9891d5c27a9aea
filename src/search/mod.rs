//! Multi-source search orchestration.
//!
//! [`SearchOrchestrator::search`] classifies the query, resolves identifiers
//! through lookup-capable sources, fans keyword searches out to every
//! searchable source under a concurrency bound, a per-source timeout and a
//! global deadline, then deduplicates and ranks what came back. Source
//! failures never fail the search; they are reported as attempts.

mod classify;

pub use classify::classify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cache::{cache_key, Cache, DiskStore};
use crate::config::{Config, ConfigError, SearchConfig};
use crate::dedup::Deduplicator;
use crate::models::{
    AttemptOperation, CanonicalRecord, FailureReason, Identifier, Query, QueryKind, RecordKind,
    ResultLimits, SearchResult, SourceAttempt, SourceRecord,
};
use crate::optimizer::{QueryOptimizationResult, QueryOptimizer};
use crate::rank::Ranker;
use crate::sources::{SourceClient, SourceError, SourceQuery, SourceRegistry};

/// One source call planned for a fan-out
#[derive(Debug, Clone)]
enum Call {
    Search(SourceQuery),
    Lookup(Identifier),
}

impl Call {
    fn operation(&self) -> AttemptOperation {
        match self {
            Call::Search(_) => AttemptOperation::Search,
            Call::Lookup(_) => AttemptOperation::Lookup,
        }
    }
}

#[derive(Debug, Clone)]
struct PlannedCall {
    source: Arc<dyn SourceClient>,
    call: Call,
}

impl PlannedCall {
    async fn run(&self) -> Result<Vec<SourceRecord>, SourceError> {
        match &self.call {
            Call::Search(query) => self.source.search(query).await,
            Call::Lookup(identifier) => self.source.lookup(identifier).await,
        }
    }
}

/// Runs unified searches across the registry
#[derive(Debug)]
pub struct SearchOrchestrator {
    registry: Arc<SourceRegistry>,
    optimizer: QueryOptimizer,
    dedup: Deduplicator,
    ranker: Ranker,
    cache: Cache<SearchResult>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(registry: Arc<SourceRegistry>, config: &Config) -> Result<Self, ConfigError> {
        let mut cache = Cache::new(config.cache.search_ttl());
        if config.cache.persist {
            let disk = DiskStore::open(config.cache.directory().join("search"))
                .map_err(|e| ConfigError::Invalid(format!("cache.directory: {}", e)))?;
            cache = cache.with_disk(disk);
        }

        Ok(Self {
            registry,
            optimizer: QueryOptimizer::with_lexicon(config.optimizer.clone()),
            dedup: Deduplicator::from_config(&config.dedup)?,
            ranker: Ranker::new(&config.rank),
            cache,
            config: config.search.clone(),
        })
    }

    /// Replace the query optimizer (e.g. to plug in an external extractor)
    pub fn with_optimizer(mut self, optimizer: QueryOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_ranker(mut self, ranker: Ranker) -> Self {
        self.ranker = ranker;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache<SearchResult> {
        &self.cache
    }

    /// Search every applicable source and return merged, ranked records.
    ///
    /// Identical concurrent searches share one execution. A result in which
    /// every source call failed is returned but not cached.
    #[tracing::instrument(skip(self, query), fields(query = %query.text()))]
    pub async fn search(&self, query: &Query, limits: ResultLimits) -> SearchResult {
        let key = cache_key(
            "search",
            &format!(
                "{}|{}|{}|{}",
                query.normalized(),
                limits.max_datasets,
                limits.max_publications,
                limits.per_source
            ),
        );

        let outcome = self
            .cache
            .get_or_compute(&key, || async {
                let result = self.execute(query, limits).await;
                if result.success() {
                    Ok(result)
                } else {
                    Err(result)
                }
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(result) => {
                tracing::warn!(
                    "Every source failed for '{}' ({} attempts)",
                    query.text(),
                    result.attempts.len()
                );
                result
            }
        }
    }

    async fn execute(&self, query: &Query, limits: ResultLimits) -> SearchResult {
        let deadline = Instant::now() + self.config.global_timeout();
        let kind = classify(query.text());
        tracing::info!("Searching ({:?})", kind);

        let mut calls = Vec::new();
        let mut optimization = None;
        match &kind {
            QueryKind::IdentifierLookup { identifier } => {
                calls.extend(self.lookup_calls(identifier));
            }
            QueryKind::Keyword => {
                let optimized = self.optimizer.optimize(query).await;
                calls.extend(self.search_calls(query, &optimized, limits));
                optimization = Some(optimized);
            }
            QueryKind::Hybrid {
                identifiers,
                remainder,
            } => {
                for identifier in identifiers {
                    calls.extend(self.lookup_calls(identifier));
                }
                if !remainder.trim().is_empty() {
                    let keyword = query.with_text(remainder.as_str());
                    let optimized = self.optimizer.optimize(&keyword).await;
                    calls.extend(self.search_calls(&keyword, &optimized, limits));
                    optimization = Some(optimized);
                }
            }
        }

        let (records, attempts) = self.fan_out(calls, deadline).await;
        let (datasets, publications): (Vec<SourceRecord>, Vec<SourceRecord>) = records
            .into_iter()
            .partition(|r| r.kind() == RecordKind::Dataset);

        let datasets = self.merge_and_rank(datasets, query, limits.max_datasets);
        let publications = self.merge_and_rank(publications, query, limits.max_publications);
        tracing::info!(
            "Search finished: {} datasets, {} publications, {}/{} sources answered",
            datasets.len(),
            publications.len(),
            attempts.iter().filter(|a| a.success).count(),
            attempts.len()
        );

        SearchResult {
            query: query.clone(),
            kind,
            optimization,
            datasets,
            publications,
            attempts,
            fetched_at: chrono::Utc::now(),
        }
    }

    fn merge_and_rank(
        &self,
        records: Vec<SourceRecord>,
        query: &Query,
        max: usize,
    ) -> Vec<CanonicalRecord> {
        let merged = self.dedup.merge(records);
        let mut ranked = self.ranker.rank(merged, query);
        ranked.truncate(max);
        ranked
    }

    fn lookup_calls(&self, identifier: &Identifier) -> Vec<PlannedCall> {
        let sources = self.registry.lookup_sources(identifier.kind());
        if sources.is_empty() {
            tracing::debug!("No source resolves {}", identifier);
        }
        sources
            .into_iter()
            .map(|source| PlannedCall {
                source,
                call: Call::Lookup(identifier.clone()),
            })
            .collect()
    }

    fn search_calls(
        &self,
        query: &Query,
        optimized: &QueryOptimizationResult,
        limits: ResultLimits,
    ) -> Vec<PlannedCall> {
        let source_query = SourceQuery {
            text: optimized.primary_query.clone(),
            raw: query.text().to_string(),
            variants: optimized.variants.clone(),
            filters: query.filters().clone(),
            max_results: limits.per_source,
        };
        self.registry
            .searchable()
            .into_iter()
            .map(|source| PlannedCall {
                source,
                call: Call::Search(source_query.clone()),
            })
            .collect()
    }

    /// Run calls in parallel tasks; calls unfinished at `deadline` are aborted
    async fn fan_out(
        &self,
        calls: Vec<PlannedCall>,
        deadline: Instant,
    ) -> (Vec<SourceRecord>, Vec<SourceAttempt>) {
        let started = Instant::now();
        let per_source = self.config.per_source_timeout();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();
        for (i, planned) in calls.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let handle = tasks.spawn(async move {
                // Released when the task ends or is aborted
                let _permit = semaphore.acquire_owned().await;
                let call_started = Instant::now();
                let outcome = tokio::time::timeout(per_source, planned.run()).await;
                (i, outcome, call_started.elapsed())
            });
            task_index.insert(handle.id(), i);
        }

        let mut finished: Vec<Option<(Result<Vec<SourceRecord>, SourceError>, Duration)>> =
            (0..calls.len()).map(|_| None).collect();

        let global = tokio::time::sleep_until(deadline);
        tokio::pin!(global);
        loop {
            tokio::select! {
                next = tasks.join_next_with_id() => match next {
                    Some(Ok((_, (i, outcome, latency)))) => {
                        let result = outcome.unwrap_or(Err(SourceError::Timeout(per_source)));
                        finished[i] = Some((result, latency));
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Source task failed: {}", e);
                        if let Some(&i) = task_index.get(&e.id()) {
                            let err = SourceError::SourceUnavailable(format!("source task failed: {}", e));
                            finished[i] = Some((Err(err), started.elapsed()));
                        }
                    }
                    None => break,
                },
                _ = &mut global => {
                    tracing::warn!("Search deadline reached with {} calls pending", tasks.len());
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut records = Vec::new();
        let mut attempts = Vec::with_capacity(calls.len());
        for (planned, outcome) in calls.iter().zip(finished) {
            let source = planned.source.id();
            let operation = planned.call.operation();
            let attempt = match outcome {
                Some((Ok(found), latency)) => {
                    let valid: Vec<SourceRecord> =
                        found.into_iter().filter(SourceRecord::is_valid).collect();
                    tracing::debug!("{} returned {} records", source, valid.len());
                    let attempt = SourceAttempt::succeeded(source, operation, latency)
                        .with_records(valid.len());
                    records.extend(valid);
                    attempt
                }
                Some((Err(e), latency)) => {
                    tracing::debug!("{} failed: {}", source, e);
                    SourceAttempt::from_error(source, operation, &e, latency)
                }
                None => SourceAttempt::failed(
                    source,
                    operation,
                    FailureReason::Timeout,
                    "global search deadline exceeded",
                    started.elapsed(),
                ),
            };
            attempts.push(attempt);
        }

        (records, attempts)
    }
}
