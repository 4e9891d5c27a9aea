//! Full-text document model and acquisition result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use super::search::SourceAttempt;

/// Waterfall tier, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    /// Canonical open repository and institutional access: structured, then PDF
    Premium,
    /// Open-access aggregators: structured/HTML only
    OaHtml,
    /// Open-access aggregators and preprint servers: PDF only
    OaPdf,
    /// Last-resort mirrors: PDF only
    Mirror,
}

impl TierLevel {
    pub const ALL: [TierLevel; 4] = [
        TierLevel::Premium,
        TierLevel::OaHtml,
        TierLevel::OaPdf,
        TierLevel::Mirror,
    ];

    /// 1-based tier number
    pub fn number(&self) -> u8 {
        match self {
            TierLevel::Premium => 1,
            TierLevel::OaHtml => 2,
            TierLevel::OaPdf => 3,
            TierLevel::Mirror => 4,
        }
    }

    /// Formats attempted for each source of this tier, in order
    pub fn formats(&self) -> &'static [FetchFormat] {
        match self {
            TierLevel::Premium => &[FetchFormat::Structured, FetchFormat::Pdf],
            TierLevel::OaHtml => &[FetchFormat::Structured],
            TierLevel::OaPdf | TierLevel::Mirror => &[FetchFormat::Pdf],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Premium => "premium",
            TierLevel::OaHtml => "oa_html",
            TierLevel::OaPdf => "oa_pdf",
            TierLevel::Mirror => "mirror",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{} ({})", self.number(), self.as_str())
    }
}

/// What a waterfall attempt asks a source for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFormat {
    /// XML, HTML or extracted text
    Structured,
    Pdf,
}

/// Format of acquired content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Xml,
    Html,
    Pdf,
}

impl ContentType {
    /// Guess a content type from a `Content-Type` header and the first bytes
    pub fn sniff(header: Option<&str>, body: &[u8]) -> Option<Self> {
        if body.starts_with(b"%PDF-") {
            return Some(ContentType::Pdf);
        }

        if let Some(header) = header.map(str::to_lowercase) {
            if header.contains("application/pdf") {
                return Some(ContentType::Pdf);
            }
            if header.contains("html") {
                return Some(ContentType::Html);
            }
            if header.contains("xml") {
                return Some(ContentType::Xml);
            }
        }

        let head: String = String::from_utf8_lossy(&body[..body.len().min(512)])
            .trim_start()
            .to_lowercase();
        if head.starts_with("<!doctype html") || head.starts_with("<html") {
            Some(ContentType::Html)
        } else if head.starts_with("<?xml") || head.starts_with("<!doctype article") || head.starts_with("<article") {
            Some(ContentType::Xml)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentType::Xml => "xml",
            ContentType::Html => "html",
            ContentType::Pdf => "pdf",
        }
    }
}

/// Article author
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Display name ("Given Surname" or collaboration name)
    pub name: String,
    pub given_names: Option<String>,
    pub surname: Option<String>,
    #[serde(default)]
    pub affiliations: Vec<String>,
    pub orcid: Option<String>,
    pub email: Option<String>,
}

/// A figure with its caption
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub id: Option<String>,
    pub label: Option<String>,
    pub caption: String,
    /// Graphic reference (`xlink:href`)
    pub graphic: Option<String>,
}

/// A table with its caption and raw markup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: Option<String>,
    pub label: Option<String>,
    pub caption: String,
    /// Embedded table markup as it appeared in the source
    pub markup: Option<String>,
}

/// A body section; sections nest recursively
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: Option<String>,
    pub title: String,
    /// Nesting depth, 1 for top-level sections
    pub level: usize,
    /// JATS `sec-type` attribute, when present (e.g. "methods")
    pub section_type: Option<String>,
    #[serde(default)]
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub figures: Vec<Figure>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub subsections: Vec<Section>,
}

impl Section {
    /// Words in this section and all its subsections
    pub fn word_count(&self) -> usize {
        let own: usize = self
            .paragraphs
            .iter()
            .map(|p| p.split_whitespace().count())
            .sum();
        own + self.subsections.iter().map(Section::word_count).sum::<usize>()
    }

    /// Depth-first iterator over this section and its descendants
    pub fn walk(&self) -> Vec<&Section> {
        let mut out = vec![self];
        for sub in &self.subsections {
            out.extend(sub.walk());
        }
        out
    }
}

/// A bibliography entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub title: Option<String>,
    /// Journal/venue
    pub source: Option<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    /// Flattened citation text, for unstructured references
    pub text: Option<String>,
}

/// Structured full-text document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullTextContent {
    pub title: String,
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Every figure in the document, in reading order
    #[serde(default)]
    pub figures: Vec<Figure>,
    /// Every table in the document, in reading order
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmc_id: Option<String>,
    /// Number of citation callouts found in body text
    pub citation_callouts: usize,
    pub word_count: usize,
    /// Content-richness score in [0, 1]
    pub quality_score: f64,
    /// Richness ignoring format, in [0, 1]
    pub completeness: f64,
}

impl FullTextContent {
    /// All body paragraphs, depth-first
    pub fn paragraphs(&self) -> impl Iterator<Item = &String> {
        self.sections
            .iter()
            .flat_map(|s| s.walk())
            .flat_map(|s| s.paragraphs.iter())
    }
}

/// Archived artifact on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex-encoded SHA-256 of the stored bytes
    pub sha256: String,
}

/// Outcome of a full-text waterfall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullTextResult {
    pub success: bool,

    /// Parsed document; set for XML/HTML successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<FullTextContent>,

    /// Archived PDF; set for PDF-only successes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,

    pub source_tier: Option<TierLevel>,
    pub source_provider: Option<String>,
    pub content_type: Option<ContentType>,

    /// In [0, 1]; 0 on failure
    pub quality_score: f64,

    /// Where the content came from; always set on success
    pub source_url: Option<String>,

    /// Raw payload saved to disk, if archiving is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRecord>,

    pub attempts: Vec<SourceAttempt>,
}

impl FullTextResult {
    /// A failed result that still explains what was tried
    pub fn failure(attempts: Vec<SourceAttempt>) -> Self {
        Self {
            success: false,
            content: None,
            pdf_path: None,
            source_tier: None,
            source_provider: None,
            content_type: None,
            quality_score: 0.0,
            source_url: None,
            artifact: None,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_formats() {
        assert_eq!(
            TierLevel::Premium.formats(),
            &[FetchFormat::Structured, FetchFormat::Pdf]
        );
        assert_eq!(TierLevel::OaHtml.formats(), &[FetchFormat::Structured]);
        assert_eq!(TierLevel::Mirror.formats(), &[FetchFormat::Pdf]);
        assert!(TierLevel::Premium < TierLevel::Mirror);
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(ContentType::sniff(None, b"%PDF-1.7\n..."), Some(ContentType::Pdf));
        assert_eq!(
            ContentType::sniff(Some("text/html; charset=utf-8"), b"<p>x</p>"),
            Some(ContentType::Html)
        );
        assert_eq!(
            ContentType::sniff(None, b"  <?xml version=\"1.0\"?><article/>"),
            Some(ContentType::Xml)
        );
        assert_eq!(ContentType::sniff(None, b"hello"), None);
    }

    #[test]
    fn test_section_word_count_recurses() {
        let section = Section {
            title: "Methods".to_string(),
            level: 1,
            paragraphs: vec!["one two three".to_string()],
            subsections: vec![Section {
                title: "Cell culture".to_string(),
                level: 2,
                paragraphs: vec!["four five".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(section.word_count(), 5);
        assert_eq!(section.walk().len(), 2);
    }
}
