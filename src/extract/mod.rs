//! Full-text content extraction.
//!
//! Structured XML (JATS, as served by PMC and Europe PMC) is parsed into a
//! light element tree and walked into a [`FullTextContent`]. HTML pages and
//! anything unrecognized degrade to a paragraph-only document via `scraper`.

mod html;
mod jats;
mod quality;
mod xml_tree;

use crate::config::ExtractConfig;
use crate::models::{ContentType, FullTextContent, Section};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Malformed XML {0}")]
    Xml(String),

    #[error("No <article> or <body> element found")]
    NoArticle,

    #[error("Extracted text too short: {chars} characters (minimum {min})")]
    TooShort { chars: usize, min: usize },

    #[error("Document has no text")]
    Empty,
}

/// Turns raw XML/HTML payloads into [`FullTextContent`]
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    min_text_chars: usize,
    min_words: usize,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(&ExtractConfig::default())
    }
}

impl ContentExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            min_text_chars: config.min_text_chars,
            min_words: config.min_words,
        }
    }

    /// Parse a JATS article.
    ///
    /// Fails when the payload is not well-formed enough to build a tree, has
    /// no `article`/`body` element, or carries less text than configured.
    pub fn extract_structured(&self, bytes: &[u8]) -> Result<FullTextContent, ExtractError> {
        let xml = String::from_utf8_lossy(bytes);
        let document = xml_tree::parse(&xml)?;
        // A bare <body> counts only outside an HTML page
        let root = document
            .find("article")
            .or_else(|| document.find("html").is_none().then(|| document.find("body")).flatten())
            .ok_or(ExtractError::NoArticle)?;

        let mut content = jats::walk(root);
        self.check_length(&content)?;
        quality::assess(&mut content, ContentType::Xml, self.min_words);
        Ok(content)
    }

    /// Parse an HTML page into a degraded document
    pub fn extract_html(&self, bytes: &[u8]) -> Result<FullTextContent, ExtractError> {
        let html = String::from_utf8_lossy(bytes);
        let mut content = html::parse(&html);
        if content.sections.is_empty() {
            // Pages without <p> markup still have text blocks
            content.sections = text_sections(&html::plain_text(&html));
            content.word_count = content.sections.iter().map(Section::word_count).sum();
        }
        self.check_length(&content)?;
        quality::assess(&mut content, ContentType::Html, self.min_words);
        Ok(content)
    }

    /// Visible text of any payload, blocks separated by blank lines
    pub fn extract_plain_text(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let raw = String::from_utf8_lossy(bytes);
        let text = match ContentType::sniff(None, bytes) {
            Some(ContentType::Html) => html::plain_text(&raw),
            Some(ContentType::Xml) => match xml_tree::parse(&raw) {
                Ok(document) => {
                    let paragraphs: Vec<String> = document
                        .find_all("p")
                        .into_iter()
                        .map(|p| p.text())
                        .filter(|p| !p.is_empty())
                        .collect();
                    if paragraphs.is_empty() {
                        document.text()
                    } else {
                        paragraphs.join("\n\n")
                    }
                }
                Err(_) => html::plain_text(&raw),
            },
            Some(ContentType::Pdf) => return Err(ExtractError::Empty),
            None => raw
                .split("\n\n")
                .map(xml_tree::collapse_whitespace)
                .filter(|b| !b.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
        };

        if text.trim().is_empty() {
            Err(ExtractError::Empty)
        } else {
            Ok(text)
        }
    }

    /// Extract whatever a structured fetch returned.
    ///
    /// XML goes through the JATS walk. When that fails and the bytes do not
    /// actually look like XML, the payload is treated as HTML; HTML that yields
    /// no usable document falls back to its plain text. Returns the document
    /// and the format it was scored as.
    pub fn extract(
        &self,
        bytes: &[u8],
        content_type: ContentType,
    ) -> Result<(FullTextContent, ContentType), ExtractError> {
        if content_type == ContentType::Xml {
            match self.extract_structured(bytes) {
                Ok(content) => return Ok((content, ContentType::Xml)),
                Err(err) if ContentType::sniff(None, bytes) == Some(ContentType::Xml) => {
                    return Err(err)
                }
                Err(err) => tracing::warn!("XML extraction failed ({}), trying HTML", err),
            }
        }

        match self.extract_html(bytes) {
            Ok(content) => Ok((content, ContentType::Html)),
            Err(err) => {
                tracing::debug!("HTML extraction failed ({}), using plain text", err);
                let text = self.extract_plain_text(bytes)?;
                let mut content = FullTextContent {
                    sections: text_sections(&text),
                    ..Default::default()
                };
                content.word_count = content.sections.iter().map(Section::word_count).sum();
                self.check_length(&content)?;
                quality::assess(&mut content, ContentType::Html, self.min_words);
                Ok((content, ContentType::Html))
            }
        }
    }

    fn check_length(&self, content: &FullTextContent) -> Result<(), ExtractError> {
        let chars = content.abstract_text.chars().count()
            + content.paragraphs().map(|p| p.chars().count()).sum::<usize>();
        if chars == 0 {
            return Err(ExtractError::Empty);
        }
        if chars < self.min_text_chars {
            return Err(ExtractError::TooShort {
                chars,
                min: self.min_text_chars,
            });
        }
        Ok(())
    }
}

/// One untitled section holding each text block as a paragraph
fn text_sections(text: &str) -> Vec<Section> {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }
    vec![Section {
        level: 1,
        paragraphs,
        ..Default::default()
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(min_text_chars: usize) -> ContentExtractor {
        ContentExtractor::new(&ExtractConfig {
            min_text_chars,
            min_words: 10,
        })
    }

    fn article(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><article><front><article-meta>
            <title-group><article-title>T</article-title></title-group>
            <abstract><p>An abstract.</p></abstract></article-meta></front>
            <body>{}</body></article>"#,
            body
        )
    }

    #[test]
    fn test_extract_structured_scores_document() {
        let xml = article(
            "<sec sec-type=\"methods\"><title>Methods</title><p>one two three four five six seven eight nine ten eleven.</p></sec>",
        );
        let content = extractor(20).extract_structured(xml.as_bytes()).unwrap();
        // format + abstract + methods + length
        assert!((content.quality_score - 0.80).abs() < 1e-9);
        assert!((content.completeness - 0.40 / 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_extract_structured_rejects_short_and_rootless() {
        let short = article("<p>Tiny.</p>");
        assert!(matches!(
            extractor(200).extract_structured(short.as_bytes()),
            Err(ExtractError::TooShort { .. })
        ));
        assert!(matches!(
            extractor(0).extract_structured(b"<pmc-articleset><error>gone</error></pmc-articleset>"),
            Err(ExtractError::NoArticle)
        ));
    }

    #[test]
    fn test_extract_degrades_html_labelled_as_xml() {
        let page = "<!DOCTYPE html><html><head><title>Page</title></head><body><p>Readable paragraph with enough text to pass.</p><br></body></html>";
        let (content, format) = extractor(10).extract(page.as_bytes(), ContentType::Xml).unwrap();
        assert_eq!(format, ContentType::Html);
        assert_eq!(content.title, "Page");
        assert!(content.quality_score <= 0.60);
    }

    #[test]
    fn test_extract_keeps_xml_errors_for_real_xml() {
        let xml = "<?xml version=\"1.0\"?><other><p>no article here at all</p></other>";
        assert!(matches!(
            extractor(0).extract(xml.as_bytes(), ContentType::Xml),
            Err(ExtractError::NoArticle)
        ));
    }

    #[test]
    fn test_extract_plain_text() {
        let e = extractor(0);
        assert_eq!(
            e.extract_plain_text(b"<?xml version=\"1.0\"?><article><p>A</p><p>B</p></article>")
                .unwrap(),
            "A\n\nB"
        );
        assert_eq!(e.extract_plain_text(b"line one\n\nline   two").unwrap(), "line one\n\nline two");
        assert!(matches!(e.extract_plain_text(b"   "), Err(ExtractError::Empty)));
    }

    #[test]
    fn test_extract_structured_decodes_entities() {
        let xml = r#"<?xml version="1.0"?><article><front><article-meta>
            <title-group><article-title>Wnt &amp; Notch in p &lt; 0.05 livers</article-title></title-group>
            <abstract><p>Zonation &#x2013; revisited.</p></abstract></article-meta></front>
            <body><sec><title>Results</title><p>Cells &amp; tissues were profiled&nbsp;twice.</p>
            <table-wrap id="t1"><caption><p>Counts &gt; 10.</p></caption>
            <table><tr><td>x &lt; y</td><td>a &amp; b</td></tr></table></table-wrap></sec></body></article>"#;
        let content = extractor(0).extract_structured(xml.as_bytes()).unwrap();
        assert_eq!(content.title, "Wnt & Notch in p < 0.05 livers");
        assert_eq!(content.abstract_text, "Zonation \u{2013} revisited.");
        assert_eq!(
            content.sections[0].paragraphs,
            vec!["Cells & tissues were profiled twice."]
        );
        assert_eq!(content.tables[0].caption, "Counts > 10.");
        assert_eq!(
            content.tables[0].markup.as_deref(),
            Some("<table><tr><td>x &lt; y</td><td>a &amp; b</td></tr></table>")
        );
    }
}
