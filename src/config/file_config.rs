//! Configuration file support.
//!
//! # Configuration File Format
//!
//! ```toml
//! [search]
//! max_concurrency = 8
//! per_source_timeout_ms = 15000
//! global_timeout_ms = 30000
//!
//! [optimizer]
//! timeout_ms = 2000
//! max_variants = 5
//!
//! [dedup]
//! similarity_threshold = 0.92
//! quality_order = ["structured_xml", "html", "aggregator_metadata", "scraped"]
//!
//! [rank.weights]
//! title_overlap = 0.35
//! recency = 0.10
//!
//! [cache]
//! search_ttl_seconds = 1800
//! fulltext_ttl_seconds = 86400
//! persist = true
//! directory = "~/.cache/bioharvest"
//!
//! [fulltext]
//! artifacts_dir = "./artifacts"
//! mirror_base_url = "https://mirror.example.org"
//!
//! [fulltext.tiers.mirrors]
//! enabled = false
//!
//! [sources]
//! disabled = ["core"]
//!
//! [[rate_limits.per_source]]
//! source = "unpaywall"
//! requests_per_second = 1.0
//!
//! [api_keys]
//! unpaywall_email = "me@example.org"
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;

use super::Config;

impl Config {
    /// Load configuration from a TOML file, without environment overrides
    pub fn load_file(path: &Path) -> Result<Self, ConfigFileError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save_file(&self, path: &Path) -> Result<(), ConfigFileError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
    }
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
