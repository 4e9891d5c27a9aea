//! Full-text waterfall behaviour against mock providers.

use bioharvest::config::Config;
use bioharvest::models::{
    CanonicalRecord, ContentType, FailureReason, FetchFormat, Identifier, TierLevel,
};
use bioharvest::sources::mock::MockFailure;
use bioharvest::sources::MockSource;
use bioharvest::{FullTextManager, SourceClient, SourceRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.fulltext.artifacts_dir = dir.path().join("artifacts");
    config.extract.min_text_chars = 50;
    config
}

fn manager(sources: &[(TierLevel, Arc<MockSource>)], config: &Config) -> FullTextManager {
    let mut registry = SourceRegistry::new();
    let mut tiers: BTreeMap<TierLevel, Vec<String>> = BTreeMap::new();
    for (tier, source) in sources {
        tiers.entry(*tier).or_default().push(source.id().to_string());
        registry.register(source.clone());
    }
    for (tier, ids) in tiers {
        registry.set_tier(tier, ids);
    }
    FullTextManager::new(&registry, config).unwrap()
}

fn publication(pmcid: &str) -> CanonicalRecord {
    CanonicalRecord::from_identifier(Identifier::pmcid(pmcid).unwrap())
}

/// A JATS article with `sections` body sections, `figures` figures and `refs` references
fn jats(sections: usize, figures: usize, refs: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<article article-type="research-article"><front><article-meta>
<title-group><article-title>Clonal dynamics of haematopoiesis</article-title></title-group>
<abstract><p>We trace stem cell clones across the lifespan using somatic mutations.</p></abstract>
</article-meta></front><body>"#,
    );
    for i in 0..sections {
        let title = if i == 0 { "Methods".to_string() } else { format!("Results {}", i) };
        xml.push_str(&format!(
            "<sec id=\"s{i}\"><title>{title}</title><p>Section {i} describes how bone marrow \
             samples were collected, sequenced and analysed for clonal expansions.</p>"
        ));
        if i == 0 {
            for f in 0..figures {
                xml.push_str(&format!(
                    "<fig id=\"f{f}\"><label>Figure {n}</label><caption><p>Clone sizes.</p></caption></fig>",
                    n = f + 1
                ));
            }
        }
        xml.push_str("</sec>");
    }
    xml.push_str("</body><back><ref-list>");
    for r in 0..refs {
        xml.push_str(&format!(
            "<ref id=\"r{r}\"><element-citation><person-group><name><surname>Author{r}</surname>\
             <given-names>A</given-names></name></person-group><article-title>Prior work {r}</article-title>\
             <source>Blood</source><year>2015</year></element-citation></ref>"
        ));
    }
    xml.push_str("</ref-list></back></article>");
    xml
}

#[tokio::test]
async fn test_structured_xml_from_repository() {
    let dir = TempDir::new().unwrap();
    let pmc = Arc::new(MockSource::new("pmc").with_payload(
        FetchFormat::Structured,
        ContentType::Xml,
        jats(2, 1, 3),
    ));
    let manager = manager(&[(TierLevel::Premium, pmc)], &config(&dir));

    let result = manager.acquire(&publication("PMC7100001")).await;
    assert!(result.success);
    assert_eq!(result.content_type, Some(ContentType::Xml));
    assert!(result.quality_score >= 0.9);

    let content = result.content.unwrap();
    assert_eq!(content.title, "Clonal dynamics of haematopoiesis");
    assert_eq!(content.sections.len(), 2);
    assert_eq!(content.figures.len(), 1);
    assert_eq!(content.references.len(), 3);
}

#[tokio::test]
async fn test_pdf_only_fallback() {
    let dir = TempDir::new().unwrap();
    let pmc = Arc::new(
        MockSource::new("pmc")
            .with_fetch_failure(FetchFormat::Structured, MockFailure::Parse)
            .with_fetch_failure(FetchFormat::Pdf, MockFailure::NotFound),
    );
    let unpaywall = Arc::new(
        MockSource::new("unpaywall").with_fetch_failure(FetchFormat::Structured, MockFailure::NotFound),
    );
    let biorxiv = Arc::new(MockSource::new("biorxiv").with_payload(
        FetchFormat::Pdf,
        ContentType::Pdf,
        b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n".to_vec(),
    ));
    let manager = manager(
        &[
            (TierLevel::Premium, pmc),
            (TierLevel::OaHtml, unpaywall),
            (TierLevel::OaPdf, biorxiv),
        ],
        &config(&dir),
    );

    let result = manager.acquire(&publication("PMC7100002")).await;
    assert!(result.success);
    assert!(result.content.is_none());
    assert_eq!(result.source_tier, Some(TierLevel::OaPdf));
    assert!(result.quality_score >= 0.65 && result.quality_score <= 0.75);

    let pdf = result.pdf_path.unwrap();
    assert!(pdf.starts_with(dir.path()));
    assert!(std::fs::read(pdf).unwrap().starts_with(b"%PDF"));

    let reasons: Vec<Option<FailureReason>> = result.attempts.iter().map(|a| a.reason).collect();
    assert_eq!(
        reasons,
        vec![
            Some(FailureReason::ParseError),
            Some(FailureReason::NotFound),
            Some(FailureReason::NotFound),
            None,
        ]
    );
}

#[tokio::test]
async fn test_waterfall_stops_at_first_success() {
    let dir = TempDir::new().unwrap();
    let pmc = Arc::new(
        MockSource::new("pmc").with_fetch_failure(FetchFormat::Structured, MockFailure::NotFound),
    );
    let institutional = Arc::new(MockSource::new("institutional").with_payload(
        FetchFormat::Structured,
        ContentType::Xml,
        jats(3, 0, 1),
    ));
    let oa = Arc::new(MockSource::new("unpaywall").with_payload(
        FetchFormat::Structured,
        ContentType::Html,
        "<html><body><article><p>never read</p></article></body></html>",
    ));
    let preprint = Arc::new(
        MockSource::new("biorxiv").with_payload(FetchFormat::Pdf, ContentType::Pdf, "%PDF-1.4"),
    );
    let mirror = Arc::new(
        MockSource::new("mirror").with_payload(FetchFormat::Pdf, ContentType::Pdf, "%PDF-1.4"),
    );

    let manager = manager(
        &[
            (TierLevel::Premium, pmc.clone()),
            (TierLevel::Premium, institutional.clone()),
            (TierLevel::OaHtml, oa.clone()),
            (TierLevel::OaPdf, preprint.clone()),
            (TierLevel::Mirror, mirror.clone()),
        ],
        &config(&dir),
    );

    let result = manager.acquire(&publication("PMC7100003")).await;
    assert!(result.success);
    assert_eq!(result.source_provider.as_deref(), Some("institutional"));
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(pmc.fetch_calls(), 1);
    assert_eq!(institutional.fetch_calls(), 1);
    assert_eq!(oa.total_calls(), 0);
    assert_eq!(preprint.total_calls(), 0);
    assert_eq!(mirror.total_calls(), 0);
}

#[tokio::test]
async fn test_premium_results_outscore_pdf_tiers() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let pdf = b"%PDF-1.6\n%synthetic\n".to_vec();

    let mut premium_scores = Vec::new();
    let mut pdf_tier_scores = Vec::new();
    for i in 0..100 {
        let xml = jats(1 + i % 4, i % 3, i % 5);
        let pmcid = format!("PMC{}", 7200000 + i);

        let premium = Arc::new(MockSource::new("pmc").with_payload(
            FetchFormat::Structured,
            ContentType::Xml,
            xml,
        ));
        let result = manager(&[(TierLevel::Premium, premium)], &config)
            .acquire(&publication(&pmcid))
            .await;
        assert!(result.success, "publication {}", i);
        premium_scores.push(result.quality_score);

        // Odd publications are only found in a mirror, even ones in an OA PDF source
        let tier = if i % 2 == 0 { TierLevel::OaPdf } else { TierLevel::Mirror };
        let fallback = Arc::new(MockSource::new("fallback").with_payload(
            FetchFormat::Pdf,
            ContentType::Pdf,
            pdf.clone(),
        ));
        let result = manager(&[(tier, fallback)], &config)
            .acquire(&publication(&pmcid))
            .await;
        assert!(result.success, "publication {} in {}", i, tier);
        pdf_tier_scores.push(result.quality_score);
    }

    let mean = |scores: &[f64]| scores.iter().sum::<f64>() / scores.len() as f64;
    assert!(mean(&premium_scores) > mean(&pdf_tier_scores));

    let worst_premium = premium_scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let best_fallback = pdf_tier_scores.iter().cloned().fold(0.0, f64::max);
    assert!(worst_premium > best_fallback);
}
