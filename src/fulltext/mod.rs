//! Full-text acquisition waterfall.
//!
//! [`FullTextManager`] walks a fixed plan of (tier, source, format) attempts
//! and stops at the first one that yields usable content:
//!
//! 1. Premium: canonical repository and institutional access, structured then PDF
//! 2. OA HTML: open-access aggregators, structured only
//! 3. OA PDF: aggregators and preprint servers, PDF only
//! 4. Mirrors: last-resort PDF sources
//!
//! Every attempt, successful or not, is recorded on the result. Successful
//! results are cached per publication; failures and cancellations are not.

mod plan;

pub use plan::{build_plan, quality_band, quality_score, PlannedAttempt};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::cache::{cache_key, Cache, DiskStore};
use crate::config::{Config, ConfigError};
use crate::extract::ContentExtractor;
use crate::fetch::{validate_pdf, ArtifactStore};
use crate::models::{
    AttemptOperation, CanonicalRecord, ContentType, FailureReason, FullTextResult, Identifier,
    SourceAttempt,
};
use crate::sources::{FetchRequest, FetchedContent, SourceClient, SourceError, SourceRegistry};

/// Cancels an acquisition started with [`FullTextManager::acquire_with_cancel`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side of a cancellation, checked between attempts and raced
/// against the attempt in flight
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn channel() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancelled; pends forever if the handle is dropped first
    async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Acquires the best available full text for a publication
#[derive(Debug)]
pub struct FullTextManager {
    plan: Vec<PlannedAttempt>,
    extractor: ContentExtractor,
    artifacts: ArtifactStore,
    save_artifacts: bool,
    cache: Cache<FullTextResult>,
}

impl FullTextManager {
    /// Build the waterfall from the registry's tier table.
    ///
    /// Fails when no tier yields a single attempt.
    pub fn new(registry: &SourceRegistry, config: &Config) -> Result<Self, ConfigError> {
        let plan = build_plan(registry);
        if plan.is_empty() {
            return Err(ConfigError::NoTiers);
        }

        let mut cache = Cache::new(config.cache.fulltext_ttl());
        if config.cache.persist {
            let disk = DiskStore::open(config.cache.directory().join("fulltext"))
                .map_err(|e| ConfigError::Invalid(format!("cache.directory: {}", e)))?;
            cache = cache.with_disk(disk);
        }

        tracing::info!("Full-text waterfall has {} planned attempts", plan.len());
        Ok(Self {
            plan,
            extractor: ContentExtractor::new(&config.extract),
            artifacts: ArtifactStore::new(&config.fulltext.artifacts_dir),
            save_artifacts: config.fulltext.save_artifacts,
            cache,
        })
    }

    pub fn plan(&self) -> &[PlannedAttempt] {
        &self.plan
    }

    pub fn cache(&self) -> &Cache<FullTextResult> {
        &self.cache
    }

    /// Acquire full text, without cancellation
    pub async fn acquire(&self, publication: &CanonicalRecord) -> FullTextResult {
        self.acquire_with_cancel(publication, CancelSignal::never()).await
    }

    /// Acquire full text for a bare identifier (DOI, PMID or PMC id)
    pub async fn acquire_by_identifier(&self, raw: &str) -> Result<FullTextResult, SourceError> {
        let identifier = Identifier::parse(raw)
            .or_else(|| Identifier::pmid(raw))
            .ok_or_else(|| SourceError::InvalidRequest(format!("not an identifier: {}", raw)))?;
        let publication = CanonicalRecord::from_identifier(identifier);
        Ok(self.acquire(&publication).await)
    }

    /// Acquire full text, giving up as soon as `cancel` fires.
    ///
    /// Concurrent requests for the same publication share one waterfall.
    #[tracing::instrument(skip_all, fields(publication = ?publication.primary_identifier()))]
    pub async fn acquire_with_cancel(
        &self,
        publication: &CanonicalRecord,
        mut cancel: CancelSignal,
    ) -> FullTextResult {
        let Some(primary) = publication.primary_identifier() else {
            return self.waterfall(publication, &mut cancel).await;
        };
        let key = cache_key("fulltext", &primary.to_string());

        let started = Instant::now();
        let mut waiter = cancel.clone();
        let signal = &mut cancel;
        let compute = self.cache.get_or_compute(&key, move || async move {
            let result = self.waterfall(publication, signal).await;
            if result.success {
                Ok(result)
            } else {
                Err(result)
            }
        });
        // A caller joining someone else's acquisition still honours its own signal
        let outcome = tokio::select! {
            biased;
            outcome = compute => outcome,
            _ = waiter.cancelled() => {
                tracing::info!("Cancelled while waiting on the acquisition of {}", primary);
                return FullTextResult::failure(vec![SourceAttempt::failed(
                    "cache",
                    AttemptOperation::Fetch,
                    FailureReason::Cancelled,
                    "cancelled while waiting for an in-flight acquisition",
                    started.elapsed(),
                )]);
            }
        };

        match outcome {
            Ok(result) => result,
            Err(result) => {
                tracing::warn!(
                    "No full text for {} after {} attempts",
                    primary,
                    result.attempts.len()
                );
                result
            }
        }
    }

    async fn waterfall(
        &self,
        publication: &CanonicalRecord,
        cancel: &mut CancelSignal,
    ) -> FullTextResult {
        let publication = Arc::new(publication.clone());
        let mut attempts = Vec::new();

        for planned in &self.plan {
            let source_id = planned.source.id().to_string();

            if cancel.is_cancelled() {
                attempts.push(cancelled_attempt(planned, Duration::ZERO));
                return FullTextResult::failure(attempts);
            }

            if !planned.source.can_fetch(&publication, planned.format) {
                attempts.push(
                    SourceAttempt::failed(
                        &source_id,
                        AttemptOperation::Fetch,
                        FailureReason::NotFound,
                        "no usable identifier for this source",
                        Duration::ZERO,
                    )
                    .in_tier(planned.tier, planned.format),
                );
                continue;
            }

            let started = Instant::now();
            let request = FetchRequest::new(publication.clone(), planned.format);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                fetched = planned.source.fetch(&request) => Some(fetched),
            };

            let outcome = match fetched {
                None => {
                    tracing::info!("Full-text acquisition cancelled during {}", source_id);
                    attempts.push(cancelled_attempt(planned, started.elapsed()));
                    return FullTextResult::failure(attempts);
                }
                Some(Ok(content)) => self.accept(planned, &publication, content).await,
                Some(Err(err)) => Err(err),
            };

            match outcome {
                Ok(mut result) => {
                    tracing::info!(
                        "Full text from {} in {} ({:.2})",
                        source_id,
                        planned.tier,
                        result.quality_score
                    );
                    attempts.push(
                        SourceAttempt::succeeded(&source_id, AttemptOperation::Fetch, started.elapsed())
                            .in_tier(planned.tier, planned.format),
                    );
                    result.attempts = attempts;
                    return result;
                }
                Err(err) => {
                    tracing::debug!("{} {:?} failed: {}", source_id, planned.format, err);
                    attempts.push(
                        SourceAttempt::from_error(
                            &source_id,
                            AttemptOperation::Fetch,
                            &err,
                            started.elapsed(),
                        )
                        .in_tier(planned.tier, planned.format),
                    );
                }
            }
        }

        FullTextResult::failure(attempts)
    }

    /// Turn a fetched payload into a successful result, or explain why it is unusable
    async fn accept(
        &self,
        planned: &PlannedAttempt,
        publication: &CanonicalRecord,
        content: FetchedContent,
    ) -> Result<FullTextResult, SourceError> {
        let source_id = planned.source.id();
        let mut result = FullTextResult::failure(Vec::new());
        result.success = true;
        result.source_tier = Some(planned.tier);
        result.source_provider = Some(source_id.to_string());
        result.source_url = Some(content.url.clone());

        match content.content_type {
            ContentType::Pdf => {
                validate_pdf(&content.bytes)?;
                let record = self.artifacts.save(source_id, publication, &content).await?;
                result.pdf_path = Some(record.path.clone());
                result.artifact = Some(record);
                result.content_type = Some(ContentType::Pdf);
                result.quality_score = quality_score(planned.tier, ContentType::Pdf, 1.0);
            }
            declared => {
                let (document, format) = self
                    .extractor
                    .extract(&content.bytes, declared)
                    .map_err(|e| SourceError::Parse(e.to_string()))?;
                if format != declared {
                    tracing::warn!("{} payload from {} degraded to {:?}", source_id, content.url, format);
                }

                result.quality_score = quality_score(planned.tier, format, document.completeness);
                result.content_type = Some(format);
                result.content = Some(document);

                if self.save_artifacts {
                    match self.artifacts.save(source_id, publication, &content).await {
                        Ok(record) => result.artifact = Some(record),
                        Err(e) => tracing::warn!("Could not archive {}: {}", content.url, e),
                    }
                }
            }
        }

        Ok(result)
    }
}

fn cancelled_attempt(planned: &PlannedAttempt, latency: Duration) -> SourceAttempt {
    SourceAttempt::failed(
        planned.source.id(),
        AttemptOperation::Fetch,
        FailureReason::Cancelled,
        "cancelled by caller",
        latency,
    )
    .in_tier(planned.tier, planned.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchFormat, TierLevel};
    use crate::sources::mock::MockFailure;
    use crate::sources::MockSource;
    use tempfile::TempDir;

    const JATS: &str = r#"<?xml version="1.0"?><article><front><article-meta>
        <article-id pub-id-type="pmc">PMC7000001</article-id>
        <title-group><article-title>Liver zonation</article-title></title-group>
        <abstract><p>Hepatocytes are zonated along the porto-central axis of the lobule.</p></abstract>
        </article-meta></front><body><sec><title>Methods</title>
        <p>Single cells were dissociated, sequenced and clustered into spatial layers using landmark genes.</p>
        </sec></body><back><ref-list><ref id="r1"><mixed-citation>Ref one.</mixed-citation></ref></ref-list></back></article>"#;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.fulltext.artifacts_dir = dir.path().to_path_buf();
        config.extract.min_text_chars = 50;
        config
    }

    fn manager(sources: Vec<(TierLevel, Arc<MockSource>)>, config: &Config) -> FullTextManager {
        let mut registry = SourceRegistry::new();
        let mut tiers: std::collections::BTreeMap<TierLevel, Vec<String>> = Default::default();
        for (tier, source) in sources {
            tiers.entry(tier).or_default().push(source.id().to_string());
            registry.register(source);
        }
        for (tier, ids) in tiers {
            registry.set_tier(tier, ids);
        }
        FullTextManager::new(&registry, config).unwrap()
    }

    fn publication() -> CanonicalRecord {
        CanonicalRecord::from_identifier(Identifier::pmcid("PMC7000001").unwrap())
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = FullTextManager::new(&SourceRegistry::new(), &config(&dir)).unwrap_err();
        assert!(matches!(err, ConfigError::NoTiers));
    }

    #[tokio::test]
    async fn test_premium_xml_wins_and_stops() {
        let dir = TempDir::new().unwrap();
        let pmc = Arc::new(MockSource::new("pmc").with_payload(
            FetchFormat::Structured,
            ContentType::Xml,
            JATS,
        ));
        let oa = Arc::new(MockSource::new("oa").with_payload(
            FetchFormat::Structured,
            ContentType::Html,
            "<html><body><p>unused</p></body></html>",
        ));
        let manager = manager(
            vec![(TierLevel::Premium, pmc.clone()), (TierLevel::OaHtml, oa.clone())],
            &config(&dir),
        );

        let result = manager.acquire(&publication()).await;
        assert!(result.success);
        assert_eq!(result.source_tier, Some(TierLevel::Premium));
        assert_eq!(result.content_type, Some(ContentType::Xml));
        assert!(result.quality_score >= 0.96 && result.quality_score <= 0.98);
        assert_eq!(result.content.as_ref().unwrap().title, "Liver zonation");
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(oa.fetch_calls(), 0);
        assert!(result.artifact.unwrap().path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_falls_through_to_pdf() {
        let dir = TempDir::new().unwrap();
        let pmc = Arc::new(
            MockSource::new("pmc")
                .with_fetch_failure(FetchFormat::Structured, MockFailure::NotFound)
                .with_fetch_failure(FetchFormat::Pdf, MockFailure::Unavailable),
        );
        let fake = Arc::new(MockSource::new("fake").with_payload(
            FetchFormat::Pdf,
            ContentType::Pdf,
            "<html>login</html>",
        ));
        let preprints = Arc::new(MockSource::new("preprints").with_payload(
            FetchFormat::Pdf,
            ContentType::Pdf,
            "%PDF-1.5 body",
        ));
        let manager = manager(
            vec![
                (TierLevel::Premium, pmc),
                (TierLevel::OaPdf, fake),
                (TierLevel::OaPdf, preprints),
            ],
            &config(&dir),
        );

        let result = manager.acquire(&publication()).await;
        assert!(result.success);
        assert_eq!(result.source_provider.as_deref(), Some("preprints"));
        assert!((result.quality_score - 0.70).abs() < 1e-9);
        let pdf = result.pdf_path.unwrap();
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.5 body");

        let reasons: Vec<Option<FailureReason>> = result.attempts.iter().map(|a| a.reason).collect();
        assert_eq!(
            reasons,
            vec![
                Some(FailureReason::NotFound),
                Some(FailureReason::SourceUnavailable),
                Some(FailureReason::ValidationError),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn test_unaddressable_source_is_skipped_without_call() {
        let dir = TempDir::new().unwrap();
        let blind = Arc::new(
            MockSource::new("blind")
                .with_payload(FetchFormat::Pdf, ContentType::Pdf, "%PDF-1.4")
                .unaddressable(),
        );
        let manager = manager(vec![(TierLevel::Mirror, blind.clone())], &config(&dir));

        let result = manager.acquire(&publication()).await;
        assert!(!result.success);
        assert_eq!(blind.fetch_calls(), 0);
        assert_eq!(result.attempts[0].reason, Some(FailureReason::NotFound));
    }

    #[tokio::test]
    async fn test_failure_not_cached_success_cached() {
        let dir = TempDir::new().unwrap();
        let pmc = Arc::new(
            MockSource::new("pmc").with_payload(FetchFormat::Structured, ContentType::Xml, JATS),
        );
        pmc.set_failure(Some(MockFailure::Unavailable));
        let manager = manager(vec![(TierLevel::Premium, pmc.clone())], &config(&dir));

        assert!(!manager.acquire(&publication()).await.success);
        assert!(manager.cache().is_empty());

        pmc.set_failure(None);
        assert!(manager.acquire(&publication()).await.success);
        assert!(manager.acquire(&publication()).await.success);
        assert_eq!(pmc.fetch_calls(), 2);
        assert_eq!(manager.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let dir = TempDir::new().unwrap();
        let slow = Arc::new(
            MockSource::new("slow")
                .with_payload(FetchFormat::Pdf, ContentType::Pdf, "%PDF-1.4")
                .with_delay(Duration::from_secs(30)),
        );
        let manager = manager(vec![(TierLevel::OaPdf, slow)], &config(&dir));

        let (handle, signal) = CancelSignal::channel();
        let publication = publication();
        let acquire = manager.acquire_with_cancel(&publication, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        };
        let (result, _) = tokio::join!(acquire, cancel);

        assert!(!result.success);
        assert_eq!(result.attempts.last().unwrap().reason, Some(FailureReason::Cancelled));
        assert!(manager.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_follower_does_not_wait_for_leader() {
        let dir = TempDir::new().unwrap();
        let slow = Arc::new(
            MockSource::new("slow")
                .with_payload(FetchFormat::Structured, ContentType::Xml, JATS)
                .with_delay(Duration::from_secs(2)),
        );
        let manager = manager(vec![(TierLevel::Premium, slow.clone())], &config(&dir));
        let publication = publication();

        let leader = manager.acquire(&publication);
        let follower = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let (handle, signal) = CancelSignal::channel();
            handle.cancel();
            let started = Instant::now();
            let result = manager.acquire_with_cancel(&publication, signal).await;
            (result, started.elapsed())
        };
        let (leader, (follower, waited)) = tokio::join!(leader, follower);

        assert!(waited < Duration::from_millis(500));
        assert!(!follower.success);
        assert_eq!(follower.attempts.last().unwrap().reason, Some(FailureReason::Cancelled));
        assert!(leader.success);
        assert_eq!(slow.fetch_calls(), 1);
        assert_eq!(manager.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_by_identifier() {
        let dir = TempDir::new().unwrap();
        let pmc = Arc::new(
            MockSource::new("pmc").with_payload(FetchFormat::Structured, ContentType::Xml, JATS),
        );
        let manager = manager(vec![(TierLevel::Premium, pmc)], &config(&dir));

        assert!(manager.acquire_by_identifier("PMC7000001").await.unwrap().success);
        assert!(matches!(
            manager.acquire_by_identifier("not an id").await,
            Err(SourceError::InvalidRequest(_))
        ));
    }
}
