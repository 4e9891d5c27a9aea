//! Mock source for testing purposes.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::{
    CanonicalRecord, ContentType, FetchFormat, Identifier, IdentifierKind, RecordBuilder,
    RecordQuality, SourceRecord,
};
use crate::sources::{
    FetchRequest, FetchedContent, SourceCapabilities, SourceClient, SourceError, SourceQuery,
};

/// Error kinds a mock can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Unavailable,
    RateLimited,
    NotFound,
    Parse,
    Validation,
    /// Reported as a timeout without actually waiting
    Timeout,
}

impl MockFailure {
    fn to_error(self, id: &str) -> SourceError {
        match self {
            MockFailure::Unavailable => SourceError::SourceUnavailable(format!("{} is down", id)),
            MockFailure::RateLimited => SourceError::RateLimited { retry_after: None },
            MockFailure::NotFound => SourceError::NotFound(format!("{}: no such record", id)),
            MockFailure::Parse => SourceError::Parse(format!("{}: malformed payload", id)),
            MockFailure::Validation => SourceError::Validation(format!("{}: bad content", id)),
            MockFailure::Timeout => SourceError::Timeout(Duration::from_secs(1)),
        }
    }
}

/// A mock source that returns predefined records and payloads.
///
/// Built with chained `with_*` methods; responses can also be swapped after
/// registration through the `set_*` methods.
#[derive(Debug)]
pub struct MockSource {
    id: String,
    name: String,
    capabilities: SourceCapabilities,
    quality: RecordQuality,
    identifier_kinds: BTreeSet<IdentifierKind>,
    addressable: bool,
    delay: Mutex<Duration>,
    failure: Mutex<Option<MockFailure>>,
    search_records: Mutex<Vec<SourceRecord>>,
    lookup_records: Mutex<Vec<SourceRecord>>,
    payloads: Mutex<HashMap<FetchFormat, Result<FetchedContent, MockFailure>>>,
    search_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockSource {
    /// Create a search-capable mock with no records
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: format!("Mock {}", id),
            id,
            capabilities: SourceCapabilities::SEARCH,
            quality: RecordQuality::AggregatorMetadata,
            identifier_kinds: BTreeSet::new(),
            addressable: true,
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            search_records: Mutex::new(Vec::new()),
            lookup_records: Mutex::new(Vec::new()),
            payloads: Mutex::new(HashMap::new()),
            search_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_quality(mut self, quality: RecordQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Advertise `LOOKUP` for these identifier kinds
    pub fn supporting(mut self, kinds: impl IntoIterator<Item = IdentifierKind>) -> Self {
        self.identifier_kinds.extend(kinds);
        self.capabilities |= SourceCapabilities::LOOKUP;
        self
    }

    /// Records returned by every search
    pub fn with_search_records(self, records: Vec<SourceRecord>) -> Self {
        self.set_search_records(records);
        self
    }

    /// Records returned by lookup, filtered by the requested identifier
    pub fn with_lookup_records(self, records: Vec<SourceRecord>) -> Self {
        *lock(&self.lookup_records) = records;
        self
    }

    /// Serve `bytes` for `format` and advertise the matching capability
    pub fn with_payload(
        mut self,
        format: FetchFormat,
        content_type: ContentType,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.capabilities |= format_capability(format);
        let content = FetchedContent {
            bytes: bytes.into(),
            content_type,
            url: format!("https://{}.example.org/{}.{}", self.id, format_slug(format), content_type.extension()),
        };
        lock(&self.payloads).insert(format, Ok(content));
        self
    }

    /// Fail fetches of `format` and advertise the matching capability
    pub fn with_fetch_failure(mut self, format: FetchFormat, failure: MockFailure) -> Self {
        self.capabilities |= format_capability(format);
        lock(&self.payloads).insert(format, Err(failure));
        self
    }

    /// Fail every operation
    pub fn failing(self, failure: MockFailure) -> Self {
        self.set_failure(Some(failure));
        self
    }

    /// Sleep before answering
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.delay) = delay;
        self
    }

    /// Report that no publication can be addressed by this source
    pub fn unaddressable(mut self) -> Self {
        self.addressable = false;
        self
    }

    pub fn set_search_records(&self, records: Vec<SourceRecord>) {
        *lock(&self.search_records) = records;
    }

    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *lock(&self.failure) = failure;
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.search_calls() + self.lookup_calls() + self.fetch_calls()
    }

    async fn pause_then_check(&self) -> Result<(), SourceError> {
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match *lock(&self.failure) {
            Some(failure) => Err(failure.to_error(&self.id)),
            None => Ok(()),
        }
    }
}

fn format_capability(format: FetchFormat) -> SourceCapabilities {
    match format {
        FetchFormat::Structured => SourceCapabilities::FULLTEXT_STRUCTURED,
        FetchFormat::Pdf => SourceCapabilities::FULLTEXT_PDF,
    }
}

fn format_slug(format: FetchFormat) -> &'static str {
    match format {
        FetchFormat::Structured => "fulltext",
        FetchFormat::Pdf => "pdf",
    }
}

#[async_trait]
impl SourceClient for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    fn quality(&self) -> RecordQuality {
        self.quality
    }

    fn supports_identifier(&self, kind: IdentifierKind) -> bool {
        self.identifier_kinds.contains(&kind)
    }

    fn can_fetch(&self, _publication: &CanonicalRecord, format: FetchFormat) -> bool {
        self.addressable && self.supports_format(format)
    }

    async fn search(&self, _query: &SourceQuery) -> Result<Vec<SourceRecord>, SourceError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause_then_check().await?;
        Ok(lock(&self.search_records).clone())
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<SourceRecord>, SourceError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.pause_then_check().await?;
        let found: Vec<SourceRecord> = lock(&self.lookup_records)
            .iter()
            .filter(|r| r.identifiers().contains(identifier))
            .cloned()
            .collect();
        if found.is_empty() {
            Err(SourceError::NotFound(identifier.to_string()))
        } else {
            Ok(found)
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedContent, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause_then_check().await?;
        let payload = lock(&self.payloads).get(&request.format).cloned();
        match payload {
            Some(Ok(content)) => Ok(content),
            Some(Err(failure)) => Err(failure.to_error(&self.id)),
            None => Err(SourceError::NotImplemented),
        }
    }
}

/// Helper function to create a dataset record for testing.
pub fn make_dataset(source: &str, accession: &str, title: &str) -> SourceRecord {
    RecordBuilder::dataset(source, accession, title)
        .accession(accession)
        .url(format!("https://{}.example.org/{}", source, accession))
        .build()
}

/// Helper function to create a publication record for testing.
pub fn make_publication(source: &str, pmid: &str, title: &str) -> SourceRecord {
    RecordBuilder::publication(source, pmid, title)
        .pmid(pmid)
        .url(format!("https://{}.example.org/{}", source, pmid))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_search_counts_calls() {
        let mock = MockSource::new("m")
            .with_search_records(vec![make_dataset("m", "GSE1", "One")]);
        let query = SourceQuery::plain("x", 10);

        assert_eq!(mock.search(&query).await.unwrap().len(), 1);
        assert_eq!(mock.search(&query).await.unwrap().len(), 1);
        assert_eq!(mock.search_calls(), 2);
        assert_eq!(mock.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_lookup_filters_by_identifier() {
        let mock = MockSource::new("m")
            .supporting([IdentifierKind::Pmid])
            .with_lookup_records(vec![
                make_publication("m", "111111", "A"),
                make_publication("m", "222222", "B"),
            ]);

        let id = Identifier::pmid("222222").unwrap();
        let found = mock.lookup(&id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data().title, "B");

        let missing = Identifier::pmid("333333").unwrap();
        assert!(matches!(
            mock.lookup(&missing).await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_fetch_payloads_and_failures() {
        let mock = MockSource::new("m")
            .with_payload(FetchFormat::Pdf, ContentType::Pdf, b"%PDF-1.4".to_vec())
            .with_fetch_failure(FetchFormat::Structured, MockFailure::NotFound);
        let publication = Arc::new(CanonicalRecord::from_identifier(
            Identifier::pmid("123456").unwrap(),
        ));

        assert!(mock.can_fetch(&publication, FetchFormat::Pdf));
        let pdf = mock
            .fetch(&FetchRequest::new(publication.clone(), FetchFormat::Pdf))
            .await
            .unwrap();
        assert_eq!(pdf.content_type, ContentType::Pdf);

        let err = mock
            .fetch(&FetchRequest::new(publication, FetchFormat::Structured))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
        assert_eq!(mock.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_failing_applies_to_all_operations() {
        let mock = MockSource::new("m").failing(MockFailure::Unavailable);
        let err = mock.search(&SourceQuery::plain("x", 1)).await.unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable(_)));

        mock.set_failure(None);
        assert!(mock.search(&SourceQuery::plain("x", 1)).await.is_ok());
    }
}
