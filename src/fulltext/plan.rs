//! The waterfall plan and its quality bands.

use std::fmt;
use std::sync::Arc;

use crate::models::{ContentType, FetchFormat, TierLevel};
use crate::sources::{SourceClient, SourceRegistry};

/// One step of the waterfall: ask `source` for `format`
#[derive(Clone)]
pub struct PlannedAttempt {
    pub tier: TierLevel,
    pub source: Arc<dyn SourceClient>,
    pub format: FetchFormat,
}

impl fmt::Debug for PlannedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedAttempt")
            .field("tier", &self.tier)
            .field("source", &self.source.id())
            .field("format", &self.format)
            .finish()
    }
}

/// Expand the registry's tier table into ordered attempts.
///
/// Tier order, then source order within a tier, then the tier's format
/// order. A source listed in a tier without the capability for one of its
/// formats simply contributes no attempt for that format.
pub fn build_plan(registry: &SourceRegistry) -> Vec<PlannedAttempt> {
    let mut plan = Vec::new();
    for tier in TierLevel::ALL {
        for source in registry.tier_sources(tier) {
            for &format in tier.formats() {
                if source.supports_format(format) {
                    plan.push(PlannedAttempt {
                        tier,
                        source: source.clone(),
                        format,
                    });
                } else {
                    tracing::debug!("{} cannot serve {:?} in {}", source.id(), format, tier);
                }
            }
        }
    }
    plan
}

/// Quality band `(low, high)` for content of `content_type` won in `tier`.
///
/// Bands never overlap across tiers for the same format, so a higher tier
/// always outscores a lower one.
pub fn quality_band(tier: TierLevel, content_type: ContentType) -> (f64, f64) {
    match (content_type, tier) {
        (ContentType::Xml, TierLevel::Premium) => (0.96, 0.98),
        (ContentType::Xml, _) => (0.93, 0.95),
        (ContentType::Html, TierLevel::Premium) => (0.86, 0.90),
        (ContentType::Html, _) => (0.80, 0.85),
        (ContentType::Pdf, TierLevel::Premium) => (0.75, 0.75),
        (ContentType::Pdf, TierLevel::OaHtml | TierLevel::OaPdf) => (0.70, 0.70),
        (ContentType::Pdf, TierLevel::Mirror) => (0.65, 0.65),
    }
}

/// Score inside the band, `completeness` in [0, 1]
pub fn quality_score(tier: TierLevel, content_type: ContentType, completeness: f64) -> f64 {
    let (low, high) = quality_band(tier, content_type);
    low + (high - low) * completeness.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockSource, SourceCapabilities};

    #[test]
    fn test_plan_order() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(MockSource::new("pmc").with_capabilities(
            SourceCapabilities::FULLTEXT_STRUCTURED | SourceCapabilities::FULLTEXT_PDF,
        )));
        registry.register(Arc::new(
            MockSource::new("oa").with_capabilities(SourceCapabilities::FULLTEXT_STRUCTURED),
        ));
        registry.register(Arc::new(
            MockSource::new("mirror").with_capabilities(SourceCapabilities::FULLTEXT_PDF),
        ));
        registry.set_tier(TierLevel::Premium, ["pmc"]);
        registry.set_tier(TierLevel::OaHtml, ["oa", "missing"]);
        // "oa" has no PDF capability and contributes nothing here
        registry.set_tier(TierLevel::OaPdf, ["oa"]);
        registry.set_tier(TierLevel::Mirror, ["mirror"]);

        let steps: Vec<(u8, String, FetchFormat)> = build_plan(&registry)
            .into_iter()
            .map(|p| (p.tier.number(), p.source.id().to_string(), p.format))
            .collect();
        assert_eq!(
            steps,
            vec![
                (1, "pmc".to_string(), FetchFormat::Structured),
                (1, "pmc".to_string(), FetchFormat::Pdf),
                (2, "oa".to_string(), FetchFormat::Structured),
                (4, "mirror".to_string(), FetchFormat::Pdf),
            ]
        );
    }

    #[test]
    fn test_bands_are_monotonic_across_tiers() {
        let ladders = [
            (ContentType::Xml, vec![TierLevel::Premium, TierLevel::OaHtml]),
            (ContentType::Html, vec![TierLevel::Premium, TierLevel::OaHtml]),
            (ContentType::Pdf, vec![TierLevel::Premium, TierLevel::OaPdf, TierLevel::Mirror]),
        ];
        for (content_type, tiers) in ladders {
            for pair in tiers.windows(2) {
                let worst_upper = quality_score(pair[0], content_type, 0.0);
                let best_lower = quality_score(pair[1], content_type, 1.0);
                assert!(worst_upper > best_lower, "{:?} {:?}", content_type, pair);
            }
        }
        assert!((quality_score(TierLevel::Premium, ContentType::Xml, 0.5) - 0.97).abs() < 1e-9);
    }
}
