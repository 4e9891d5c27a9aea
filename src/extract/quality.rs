//! Document quality scoring.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ContentType, FullTextContent};

const ABSTRACT_WEIGHT: f64 = 0.15;
const METHODS_WEIGHT: f64 = 0.15;
const REFERENCES_WEIGHT: f64 = 0.10;
const FIGURES_WEIGHT: f64 = 0.10;
const LENGTH_WEIGHT: f64 = 0.10;

/// Sum of every non-format component
const CONTENT_WEIGHT: f64 =
    ABSTRACT_WEIGHT + METHODS_WEIGHT + REFERENCES_WEIGHT + FIGURES_WEIGHT + LENGTH_WEIGHT;

static METHODS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(methods?|materials|methodology|experimental|procedures?)\b")
        .expect("static methods regex")
});

fn format_weight(format: ContentType) -> f64 {
    match format {
        ContentType::Xml => 0.40,
        ContentType::Html => 0.20,
        ContentType::Pdf => 0.0,
    }
}

/// Score components present in a document, excluding format, as the raw sum
fn content_score(content: &FullTextContent, min_words: usize) -> f64 {
    let mut score = 0.0;
    if !content.abstract_text.trim().is_empty() {
        score += ABSTRACT_WEIGHT;
    }
    if has_methods_section(content) {
        score += METHODS_WEIGHT;
    }
    if !content.references.is_empty() {
        score += REFERENCES_WEIGHT;
    }
    if !content.figures.is_empty() {
        score += FIGURES_WEIGHT;
    }
    if content.word_count >= min_words {
        score += LENGTH_WEIGHT;
    }
    score
}

fn has_methods_section(content: &FullTextContent) -> bool {
    content.sections.iter().flat_map(|s| s.walk()).any(|s| {
        METHODS_RE.is_match(&s.title)
            || s.section_type.as_deref().is_some_and(|t| METHODS_RE.is_match(t))
    })
}

/// Fill `quality_score` and `completeness` on a freshly extracted document
pub(crate) fn assess(content: &mut FullTextContent, format: ContentType, min_words: usize) {
    let components = content_score(content, min_words);
    content.quality_score = (format_weight(format) + components).clamp(0.0, 1.0);
    content.completeness = (components / CONTENT_WEIGHT).clamp(0.0, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Figure, Reference, Section};

    fn rich() -> FullTextContent {
        FullTextContent {
            abstract_text: "Abstract.".to_string(),
            sections: vec![Section {
                title: "Materials and Methods".to_string(),
                paragraphs: vec!["word ".repeat(20)],
                ..Default::default()
            }],
            references: vec![Reference::default()],
            figures: vec![Figure::default()],
            word_count: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_xml_scores_one() {
        let mut c = rich();
        assess(&mut c, ContentType::Xml, 10);
        assert!((c.quality_score - 1.0).abs() < 1e-9);
        assert!((c.completeness - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_html_format_weight_and_partial_completeness() {
        let mut c = rich();
        c.figures.clear();
        assess(&mut c, ContentType::Html, 1000);
        // abstract + methods + references
        assert!((c.quality_score - 0.60).abs() < 1e-9);
        assert!((c.completeness - 0.40 / 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_methods_detected_by_sec_type() {
        let c = FullTextContent {
            sections: vec![Section {
                title: "Approach".to_string(),
                subsections: vec![Section {
                    section_type: Some("methods".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(has_methods_section(&c));
        assert!(!has_methods_section(&FullTextContent::default()));
    }
}
