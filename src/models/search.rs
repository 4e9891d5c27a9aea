//! Search results and per-source attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::canonical::CanonicalRecord;
use super::fulltext::{FetchFormat, TierLevel};
use super::query::{Query, QueryKind};
use crate::optimizer::QueryOptimizationResult;
use crate::sources::SourceError;

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Network error or 5xx
    SourceUnavailable,
    /// 429 or other backpressure signal, after retries
    RateLimited,
    /// No record or content at the source
    NotFound,
    /// Malformed XML/HTML/JSON
    ParseError,
    Timeout,
    /// Content failed a validity check (e.g. not a PDF)
    ValidationError,
    /// The caller cancelled the operation
    Cancelled,
    /// The source does not support the requested operation
    Unsupported,
}

impl From<&SourceError> for FailureReason {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::SourceUnavailable(_) | SourceError::Io(_) => {
                FailureReason::SourceUnavailable
            }
            SourceError::RateLimited { .. } => FailureReason::RateLimited,
            SourceError::NotFound(_) => FailureReason::NotFound,
            SourceError::Parse(_) => FailureReason::ParseError,
            SourceError::Timeout(_) => FailureReason::Timeout,
            SourceError::Validation(_) | SourceError::InvalidRequest(_) => {
                FailureReason::ValidationError
            }
            SourceError::NotImplemented => FailureReason::Unsupported,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::SourceUnavailable => "source_unavailable",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::NotFound => "not_found",
            FailureReason::ParseError => "parse_error",
            FailureReason::Timeout => "timeout",
            FailureReason::ValidationError => "validation_error",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Which operation an attempt performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOperation {
    Search,
    Lookup,
    Fetch,
}

/// One call to one source, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: String,
    pub operation: AttemptOperation,

    /// Waterfall tier, for full-text attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierLevel>,

    /// Requested format, for full-text attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FetchFormat>,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub latency_ms: u64,

    /// Number of records returned (search/lookup)
    #[serde(default)]
    pub records: usize,
}

impl SourceAttempt {
    pub fn succeeded(source: impl Into<String>, operation: AttemptOperation, latency: Duration) -> Self {
        Self {
            source: source.into(),
            operation,
            tier: None,
            format: None,
            success: true,
            reason: None,
            message: None,
            latency_ms: latency.as_millis() as u64,
            records: 0,
        }
    }

    pub fn failed(
        source: impl Into<String>,
        operation: AttemptOperation,
        reason: FailureReason,
        message: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            operation,
            tier: None,
            format: None,
            success: false,
            reason: Some(reason),
            message: Some(message.into()),
            latency_ms: latency.as_millis() as u64,
            records: 0,
        }
    }

    /// Record a failed call from its error
    pub fn from_error(
        source: impl Into<String>,
        operation: AttemptOperation,
        err: &SourceError,
        latency: Duration,
    ) -> Self {
        Self::failed(source, operation, FailureReason::from(err), err.to_string(), latency)
    }

    pub fn with_records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }

    pub fn in_tier(mut self, tier: TierLevel, format: FetchFormat) -> Self {
        self.tier = Some(tier);
        self.format = Some(format);
        self
    }
}

/// Unified result of a multi-source search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: Query,
    pub kind: QueryKind,

    /// Present for keyword and hybrid searches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<QueryOptimizationResult>,

    /// Ranked, descending
    pub datasets: Vec<CanonicalRecord>,

    /// Ranked, descending
    pub publications: Vec<CanonicalRecord>,

    /// One entry per source call
    pub attempts: Vec<SourceAttempt>,

    pub fetched_at: DateTime<Utc>,
}

impl SearchResult {
    /// True when at least one source answered
    pub fn success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.publications.is_empty()
    }

    pub fn failed_attempts(&self) -> impl Iterator<Item = &SourceAttempt> {
        self.attempts.iter().filter(|a| !a.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            FailureReason::from(&SourceError::RateLimited { retry_after: None }),
            FailureReason::RateLimited
        );
        assert_eq!(
            FailureReason::from(&SourceError::NotFound("x".to_string())),
            FailureReason::NotFound
        );
        assert_eq!(
            FailureReason::from(&SourceError::Timeout(Duration::from_secs(1))),
            FailureReason::Timeout
        );
        assert_eq!(
            FailureReason::from(&SourceError::Validation("not a pdf".to_string())),
            FailureReason::ValidationError
        );
    }

    #[test]
    fn test_attempt_serializes_without_empty_fields() {
        let attempt =
            SourceAttempt::succeeded("geo", AttemptOperation::Search, Duration::from_millis(12))
                .with_records(3);
        let json = serde_json::to_value(&attempt).unwrap();
        assert_eq!(json["records"], 3);
        assert!(json.get("reason").is_none());
        assert!(json.get("tier").is_none());
    }
}
