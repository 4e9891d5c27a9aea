//! Configuration management.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a working configuration. [`load_config`] layers a TOML file under
//! `BIOHARVEST_` environment overrides (e.g. `BIOHARVEST_SEARCH__MAX_CONCURRENCY=4`).

mod file_config;

pub use file_config::ConfigFileError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{RecordQuality, TierLevel};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub rank: RankConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub fulltext: FullTextConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

/// Search fan-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum source calls in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for a single source call
    #[serde(default = "default_per_source_timeout_ms")]
    pub per_source_timeout_ms: u64,

    /// Wall-clock bound for the whole fan-out
    #[serde(default = "default_global_timeout_ms")]
    pub global_timeout_ms: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_per_source_timeout_ms() -> u64 {
    15_000
}

fn default_global_timeout_ms() -> u64 {
    30_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_source_timeout_ms: default_per_source_timeout_ms(),
            global_timeout_ms: default_global_timeout_ms(),
        }
    }
}

impl SearchConfig {
    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }
}

/// Query optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entity extraction timeout
    #[serde(default = "default_optimizer_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
}

fn default_optimizer_timeout_ms() -> u64 {
    2_000
}

fn default_max_variants() -> usize {
    5
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_optimizer_timeout_ms(),
            max_variants: default_max_variants(),
        }
    }
}

impl OptimizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Deduplication settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Fuzzy score at or above which two records are the same entity
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Record qualities, most trusted first
    #[serde(default = "default_quality_order")]
    pub quality_order: Vec<String>,
}

fn default_similarity_threshold() -> f64 {
    0.92
}

fn default_quality_order() -> Vec<String> {
    ["structured_xml", "html", "aggregator_metadata", "scraped"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            quality_order: default_quality_order(),
        }
    }
}

impl DedupConfig {
    /// Parsed quality order; qualities not listed rank after listed ones
    pub fn parsed_quality_order(&self) -> Result<Vec<RecordQuality>, ConfigError> {
        let mut order = Vec::new();
        for name in &self.quality_order {
            let quality = RecordQuality::parse(name).ok_or_else(|| {
                ConfigError::Invalid(format!("dedup.quality_order: unknown quality '{}'", name))
            })?;
            if order.contains(&quality) {
                return Err(ConfigError::Invalid(format!(
                    "dedup.quality_order: '{}' listed twice",
                    name
                )));
            }
            order.push(quality);
        }

        for quality in [
            RecordQuality::StructuredXml,
            RecordQuality::Html,
            RecordQuality::AggregatorMetadata,
            RecordQuality::Scraped,
        ] {
            if !order.contains(&quality) {
                order.push(quality);
            }
        }
        Ok(order)
    }
}

/// Ranking factor weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    #[serde(default = "default_w_title")]
    pub title_overlap: f64,
    #[serde(default = "default_w_summary")]
    pub summary_overlap: f64,
    #[serde(default = "default_w_organism")]
    pub organism_match: f64,
    #[serde(default = "default_w_type")]
    pub type_match: f64,
    #[serde(default = "default_w_samples")]
    pub sample_count: f64,
    /// Applied only when the query sets a minimum sample count
    #[serde(default = "default_w_sample_threshold")]
    pub sample_threshold: f64,
    #[serde(default = "default_w_recency")]
    pub recency: f64,
    #[serde(default = "default_w_agreement")]
    pub source_agreement: f64,
}

fn default_w_title() -> f64 {
    0.35
}
fn default_w_summary() -> f64 {
    0.15
}
fn default_w_organism() -> f64 {
    0.15
}
fn default_w_type() -> f64 {
    0.10
}
fn default_w_samples() -> f64 {
    0.10
}
fn default_w_sample_threshold() -> f64 {
    0.10
}
fn default_w_recency() -> f64 {
    0.10
}
fn default_w_agreement() -> f64 {
    0.05
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            title_overlap: default_w_title(),
            summary_overlap: default_w_summary(),
            organism_match: default_w_organism(),
            type_match: default_w_type(),
            sample_count: default_w_samples(),
            sample_threshold: default_w_sample_threshold(),
            recency: default_w_recency(),
            source_agreement: default_w_agreement(),
        }
    }
}

impl RankWeights {
    fn all(&self) -> [(&'static str, f64); 8] {
        [
            ("title_overlap", self.title_overlap),
            ("summary_overlap", self.summary_overlap),
            ("organism_match", self.organism_match),
            ("type_match", self.type_match),
            ("sample_count", self.sample_count),
            ("sample_threshold", self.sample_threshold),
            ("recency", self.recency),
            ("source_agreement", self.source_agreement),
        ]
    }
}

/// Ranker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankConfig {
    #[serde(default)]
    pub weights: RankWeights,

    /// Age in years at which the recency factor halves
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_years: f64,
}

fn default_recency_half_life() -> f64 {
    5.0
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            weights: RankWeights::default(),
            recency_half_life_years: default_recency_half_life(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_search_ttl")]
    pub search_ttl_seconds: u64,

    #[serde(default = "default_fulltext_ttl")]
    pub fulltext_ttl_seconds: u64,

    /// Persist entries to disk under `directory`
    #[serde(default)]
    pub persist: bool,

    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_search_ttl() -> u64 {
    1800 // 30 minutes
}

fn default_fulltext_ttl() -> u64 {
    86_400 // 1 day
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_seconds: default_search_ttl(),
            fulltext_ttl_seconds: default_fulltext_ttl(),
            persist: false,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_seconds)
    }

    pub fn fulltext_ttl(&self) -> Duration {
        Duration::from_secs(self.fulltext_ttl_seconds)
    }

    /// Configured directory, or the platform cache directory
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Get the default cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join(env!("CARGO_PKG_NAME"))
}

/// Structured content extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Below this many characters of text, XML is not treated as an article
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// Word count that earns the length component of the quality score
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

fn default_min_text_chars() -> usize {
    200
}

fn default_min_words() -> usize {
    1500
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            min_words: default_min_words(),
        }
    }
}

/// One waterfall tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Source ids, tried in order
    #[serde(default)]
    pub sources: Vec<String>,
}

impl TierConfig {
    fn with_sources(sources: &[&str]) -> Self {
        Self {
            enabled: true,
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The four waterfall tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default = "default_premium")]
    pub premium: TierConfig,

    #[serde(default = "default_oa_html")]
    pub oa_html: TierConfig,

    #[serde(default = "default_oa_pdf")]
    pub oa_pdf: TierConfig,

    /// Last-resort mirrors; on by default, set `enabled = false` for stricter policies
    #[serde(default = "default_mirrors")]
    pub mirrors: TierConfig,
}

fn default_premium() -> TierConfig {
    TierConfig::with_sources(&["pmc", "institutional"])
}

fn default_oa_html() -> TierConfig {
    TierConfig::with_sources(&["europe_pmc", "unpaywall", "core"])
}

fn default_oa_pdf() -> TierConfig {
    TierConfig::with_sources(&["unpaywall", "europe_pmc", "core", "biorxiv"])
}

fn default_mirrors() -> TierConfig {
    TierConfig::with_sources(&["mirror"])
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            premium: default_premium(),
            oa_html: default_oa_html(),
            oa_pdf: default_oa_pdf(),
            mirrors: default_mirrors(),
        }
    }
}

impl TiersConfig {
    pub fn get(&self, tier: TierLevel) -> &TierConfig {
        match tier {
            TierLevel::Premium => &self.premium,
            TierLevel::OaHtml => &self.oa_html,
            TierLevel::OaPdf => &self.oa_pdf,
            TierLevel::Mirror => &self.mirrors,
        }
    }

    pub fn get_mut(&mut self, tier: TierLevel) -> &mut TierConfig {
        match tier {
            TierLevel::Premium => &mut self.premium,
            TierLevel::OaHtml => &mut self.oa_html,
            TierLevel::OaPdf => &mut self.oa_pdf,
            TierLevel::Mirror => &mut self.mirrors,
        }
    }

    /// Enabled tiers with their source lists, in priority order
    pub fn enabled(&self) -> impl Iterator<Item = (TierLevel, &[String])> {
        TierLevel::ALL
            .into_iter()
            .map(|tier| (tier, self.get(tier)))
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(tier, cfg)| (tier, cfg.sources.as_slice()))
    }
}

/// Full-text acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullTextConfig {
    #[serde(default)]
    pub tiers: TiersConfig,

    /// Where fetched XML/HTML/PDF payloads are archived
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Archive every successful payload, not just PDFs
    #[serde(default = "default_true")]
    pub save_artifacts: bool,

    /// Refuse downloads larger than this
    #[serde(default = "default_max_download_mb")]
    pub max_download_mb: usize,

    /// Reject URLs pointing at loopback or private networks
    #[serde(default = "default_true")]
    pub block_private_hosts: bool,

    /// Base URL of the last-resort mirror; the mirror source is skipped when unset
    #[serde(default)]
    pub mirror_base_url: Option<String>,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_max_download_mb() -> usize {
    50
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            tiers: TiersConfig::default(),
            artifacts_dir: default_artifacts_dir(),
            save_artifacts: true,
            max_download_mb: default_max_download_mb(),
            block_private_hosts: true,
            mirror_base_url: None,
        }
    }
}

/// Which providers are active
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Only use these sources, when set
    #[serde(default)]
    pub enabled: Option<Vec<String>>,

    /// Never use these sources
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Base URL overrides per source id
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl SourcesConfig {
    /// `disabled` always wins over `enabled`
    pub fn is_enabled(&self, id: &str) -> bool {
        if self.disabled.iter().any(|s| s.eq_ignore_ascii_case(id)) {
            return false;
        }
        match &self.enabled {
            Some(enabled) => enabled.iter().any(|s| s.eq_ignore_ascii_case(id)),
            None => true,
        }
    }

    pub fn endpoint(&self, id: &str) -> Option<&str> {
        self.endpoints.get(id).map(String::as_str)
    }
}

/// Per-source rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRateConfig {
    pub source: String,
    pub requests_per_second: f64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default requests per second for APIs
    #[serde(default = "default_rps")]
    pub default_requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(default)]
    pub per_source: Vec<SourceRateConfig>,
}

fn default_rps() -> f64 {
    3.0
}

fn default_burst() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_requests_per_second: default_rps(),
            burst: default_burst(),
            request_timeout_seconds: default_request_timeout(),
            per_source: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Rate for a source, falling back to the default
    pub fn for_source(&self, id: &str) -> f64 {
        self.per_source
            .iter()
            .find(|r| r.source.eq_ignore_ascii_case(id))
            .map(|r| r.requests_per_second)
            .unwrap_or(self.default_requests_per_second)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// API keys for external services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    /// NCBI E-utilities key (raises the limit from 3 to 10 requests/second)
    #[serde(default)]
    pub ncbi: Option<String>,

    /// CORE API key
    #[serde(default)]
    pub core: Option<String>,

    /// Contact email, required by Unpaywall
    #[serde(default)]
    pub unpaywall_email: Option<String>,
}

impl Default for ApiKeys {
    fn default() -> Self {
        Self {
            ncbi: std::env::var("NCBI_API_KEY").ok(),
            core: std::env::var("CORE_API_KEY").ok(),
            unpaywall_email: std::env::var("UNPAYWALL_EMAIL").ok(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" for structured output, anything else for human-readable
    #[serde(default)]
    pub format: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

/// Startup configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Every full-text tier is disabled or empty")]
    NoTiers,

    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    File(#[from] ConfigFileError),
}

impl Config {
    /// Check startup invariants. A configuration that fails here is a
    /// programming or deployment error, never a request-time condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "search.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.search.per_source_timeout_ms == 0 || self.search.global_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "search timeouts must be positive".to_string(),
            ));
        }

        let threshold = self.dedup.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "dedup.similarity_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        self.dedup.parsed_quality_order()?;

        for (name, weight) in self.rank.weights.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "rank.weights.{} must be a non-negative number",
                    name
                )));
            }
        }
        if self.rank.recency_half_life_years <= 0.0 {
            return Err(ConfigError::Invalid(
                "rank.recency_half_life_years must be positive".to_string(),
            ));
        }

        if self.fulltext.tiers.enabled().all(|(_, sources)| sources.is_empty()) {
            return Err(ConfigError::NoTiers);
        }

        if let Some(url) = &self.fulltext.mirror_base_url {
            crate::utils::validate_url(url, false)
                .map_err(|e| ConfigError::Invalid(format!("fulltext.mirror_base_url: {}", e)))?;
        }

        Ok(())
    }
}

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("BIOHARVEST")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Configuration from environment overrides alone
pub fn load_env_config() -> Result<Config, ConfigError> {
    let settings = config::Config::builder()
        .add_source(
            config::Environment::with_prefix("BIOHARVEST")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// First existing config file: `./bioharvest.toml`, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(format!("{}.toml", env!("CARGO_PKG_NAME")));
    let user = dirs::config_dir().map(|d| d.join(env!("CARGO_PKG_NAME")).join("config.toml"));
    std::iter::once(local)
        .chain(user)
        .find(|p| p.is_file())
}
