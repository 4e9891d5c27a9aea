//! Typed registry of provider clients and the full-text tier table.
//!
//! The registry is built once at startup, from configuration or by hand in
//! tests, and is read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{
    BiorxivSource, CoreSource, EuropePmcSource, GeoSource, InstitutionalAccess,
    InstitutionalSource, MirrorSource, OpenAlexSource, PmcSource, PubMedSource, SourceClient,
    SourceError, UnpaywallSource,
};
use crate::config::Config;
use crate::fetch::FetchLimits;
use crate::models::{IdentifierKind, TierLevel};
use crate::utils::{HttpClient, RetryConfig};

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const LOOKUP = 1 << 1;
        const FULLTEXT_STRUCTURED = 1 << 2;
        const FULLTEXT_PDF = 1 << 3;
    }
}

/// Registry for all configured provider clients
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    /// Registration order is preserved for deterministic fan-out
    sources: Vec<Arc<dyn SourceClient>>,
    index: HashMap<String, usize>,
    tiers: BTreeMap<TierLevel, Vec<String>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled provider from configuration
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        let sources = &config.sources;
        let keys = &config.api_keys;
        let limits = FetchLimits::from_config(&config.fulltext);

        let http = |id: &str| {
            HttpClient::builder()
                .timeout(config.rate_limits.request_timeout())
                .rate_limit(config.rate_limits.for_source(id), config.rate_limits.burst)
                .retry(RetryConfig::default())
                .build()
        };

        if sources.is_enabled("geo") {
            let mut geo = GeoSource::new(http("geo"), keys.ncbi.clone());
            if let Some(url) = sources.endpoint("geo") {
                geo = geo.with_base_url(url);
            }
            registry.register(Arc::new(geo));
        }

        if sources.is_enabled("pubmed") {
            let mut pubmed = PubMedSource::new(http("pubmed"), keys.ncbi.clone());
            if let Some(url) = sources.endpoint("pubmed") {
                pubmed = pubmed.with_base_url(url);
            }
            registry.register(Arc::new(pubmed));
        }

        if sources.is_enabled("europe_pmc") {
            let mut epmc = EuropePmcSource::new(http("europe_pmc")).with_fetch_limits(limits);
            if let Some(url) = sources.endpoint("europe_pmc") {
                epmc = epmc.with_base_url(url);
            }
            registry.register(Arc::new(epmc));
        }

        if sources.is_enabled("openalex") {
            let mut openalex =
                OpenAlexSource::new(http("openalex"), keys.unpaywall_email.clone());
            if let Some(url) = sources.endpoint("openalex") {
                openalex = openalex.with_base_url(url);
            }
            registry.register(Arc::new(openalex));
        }

        if sources.is_enabled("pmc") {
            let mut pmc = PmcSource::new(http("pmc"), keys.ncbi.clone()).with_fetch_limits(limits);
            if let Some(url) = sources.endpoint("pmc") {
                pmc = pmc.with_base_url(url);
            }
            registry.register(Arc::new(pmc));
        }

        if sources.is_enabled("unpaywall") {
            match &keys.unpaywall_email {
                Some(email) => {
                    let mut unpaywall = UnpaywallSource::new(http("unpaywall"), email.clone())
                        .with_fetch_limits(limits);
                    if let Some(url) = sources.endpoint("unpaywall") {
                        unpaywall = unpaywall.with_base_url(url);
                    }
                    registry.register(Arc::new(unpaywall));
                }
                None => tracing::debug!("Unpaywall skipped: no contact email configured"),
            }
        }

        if sources.is_enabled("core") {
            match &keys.core {
                Some(key) => {
                    let mut core =
                        CoreSource::new(http("core"), key.clone()).with_fetch_limits(limits);
                    if let Some(url) = sources.endpoint("core") {
                        core = core.with_base_url(url);
                    }
                    registry.register(Arc::new(core));
                }
                None => tracing::debug!("CORE skipped: no API key configured"),
            }
        }

        if sources.is_enabled("biorxiv") {
            let mut biorxiv = BiorxivSource::new(http("biorxiv")).with_fetch_limits(limits);
            if let Some(url) = sources.endpoint("biorxiv") {
                biorxiv = biorxiv.with_base_url(url);
            }
            registry.register(Arc::new(biorxiv));
        }

        if sources.is_enabled("mirror") {
            if let Some(base) = &config.fulltext.mirror_base_url {
                let mirror = MirrorSource::new(http("mirror"), base.clone()).with_fetch_limits(limits);
                registry.register(Arc::new(mirror));
            }
        }

        registry.set_tiers_from_config(config);
        tracing::info!(
            "Registered {} sources: {}",
            registry.len(),
            registry.ids().collect::<Vec<_>>().join(", ")
        );
        registry
    }

    /// Copy the tier table from configuration; disabled tiers are left empty
    pub fn set_tiers_from_config(&mut self, config: &Config) {
        self.tiers.clear();
        for (tier, ids) in config.fulltext.tiers.enabled() {
            self.tiers.insert(tier, ids.to_vec());
        }
    }

    /// Register a new source; a source with the same id is replaced
    pub fn register(&mut self, source: Arc<dyn SourceClient>) {
        let id = source.id().to_string();
        match self.index.get(&id) {
            Some(&i) => self.sources[i] = source,
            None => {
                self.index.insert(id, self.sources.len());
                self.sources.push(source);
            }
        }
    }

    /// Register an institutional access collaborator as the `institutional` source
    pub fn register_institutional(
        &mut self,
        access: Arc<dyn InstitutionalAccess>,
        http: HttpClient,
        limits: FetchLimits,
    ) {
        self.register(Arc::new(
            InstitutionalSource::new(access, http).with_fetch_limits(limits),
        ));
    }

    /// Set one tier's ordered source ids
    pub fn set_tier<I, S>(&mut self, tier: TierLevel, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tiers
            .insert(tier, ids.into_iter().map(Into::into).collect());
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceClient>> {
        self.index.get(id).map(|&i| &self.sources[i])
    }

    /// Get a source by ID, returning an error if not found
    pub fn get_required(&self, id: &str) -> Result<&Arc<dyn SourceClient>, SourceError> {
        self.get(id)
            .ok_or_else(|| SourceError::NotFound(format!("Source '{}' not found", id)))
    }

    /// All sources, in registration order
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn SourceClient>> {
        self.sources.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id())
    }

    /// Get sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<Arc<dyn SourceClient>> {
        self.all()
            .filter(|s| s.capabilities().contains(capability))
            .cloned()
            .collect()
    }

    /// Sources that take part in keyword fan-out
    pub fn searchable(&self) -> Vec<Arc<dyn SourceClient>> {
        self.with_capability(SourceCapabilities::SEARCH)
    }

    /// Sources that can resolve this kind of identifier
    pub fn lookup_sources(&self, kind: IdentifierKind) -> Vec<Arc<dyn SourceClient>> {
        self.all()
            .filter(|s| s.supports_lookup() && s.supports_identifier(kind))
            .cloned()
            .collect()
    }

    /// Ordered source ids configured for a tier
    pub fn tier_ids(&self, tier: TierLevel) -> &[String] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Registered clients for a tier, in tier order; unknown ids are skipped
    pub fn tier_sources(&self, tier: TierLevel) -> Vec<Arc<dyn SourceClient>> {
        self.tier_ids(tier)
            .iter()
            .filter_map(|id| match self.get(id) {
                Some(source) => Some(source.clone()),
                None => {
                    tracing::debug!("Tier {} source '{}' is not registered", tier, id);
                    None
                }
            })
            .collect()
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
