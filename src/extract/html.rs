//! Degraded documents from publisher HTML pages.
//!
//! Publisher landing pages carry Highwire `citation_*` meta tags for the
//! bibliographic fields; the body is recovered as `h2`/`h3` sections of
//! paragraphs.

use scraper::{ElementRef, Html, Node, Selector};

use super::xml_tree::collapse_whitespace;
use crate::models::{Author, Figure, FullTextContent, Reference, Section, Table};
use crate::utils::{normalize_doi, normalize_pmid};

/// Containers whose paragraphs are not body text
const EXCLUDED_CONTAINERS: &[&str] = &[
    "nav", "header", "footer", "aside", "figure", "figcaption", "script", "style", "noscript",
];

/// Elements that start a new block of plain text
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "li", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6",
    "pre", "blockquote", "dd", "dt", "br", "tr",
];

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn meta(doc: &Html, name: &str) -> Vec<String> {
    let Some(sel) = selector(&format!("meta[name=\"{}\"], meta[property=\"{}\"]", name, name)) else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|c| !c.is_empty())
        .collect()
}

fn first_meta(doc: &Html, names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| meta(doc, n).into_iter().next())
}

fn first_text(root: ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css)?;
    root.select(&sel).map(element_text).find(|t| !t.is_empty())
}

/// Class/id markers of abstract and bibliography blocks
fn marks_excluded_block(el: &scraper::node::Element) -> bool {
    let id = el.id().unwrap_or_default().to_lowercase();
    let classes = el.classes().map(str::to_lowercase).collect::<Vec<_>>();
    let marked = |needle: &str| id.contains(needle) || classes.iter().any(|c| c.contains(needle));
    marked("abstract") || marked("references") || marked("bibliography") || marked("ref-list")
}

fn excluded(el: ElementRef<'_>) -> bool {
    el.ancestors().filter_map(ElementRef::wrap).any(|a| {
        EXCLUDED_CONTAINERS.contains(&a.value().name()) || marks_excluded_block(a.value())
    })
}

fn content_root(doc: &Html) -> ElementRef<'_> {
    ["article", "main", "[role=main]", "body"]
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| doc.select(&sel).next())
        .unwrap_or_else(|| doc.root_element())
}

/// Parse an HTML page into a document. Scores are left at zero.
pub(crate) fn parse(html: &str) -> FullTextContent {
    let doc = Html::parse_document(html);
    let root = content_root(&doc);

    let mut content = FullTextContent {
        title: first_meta(&doc, &["citation_title", "dc.title", "og:title"])
            .or_else(|| first_text(doc.root_element(), "h1"))
            .or_else(|| first_text(doc.root_element(), "title"))
            .unwrap_or_default(),
        abstract_text: first_meta(&doc, &["citation_abstract", "dc.description"])
            .or_else(|| abstract_block(root))
            .unwrap_or_default(),
        journal: first_meta(&doc, &["citation_journal_title"]),
        doi: first_meta(&doc, &["citation_doi", "dc.identifier"])
            .and_then(|d| normalize_doi(&d).ok()),
        pmid: first_meta(&doc, &["citation_pmid"]).and_then(|p| normalize_pmid(&p).ok()),
        year: first_meta(
            &doc,
            &["citation_publication_date", "citation_date", "citation_online_date"],
        )
        .and_then(|d| d.get(..4).and_then(|y| y.parse().ok())),
        ..Default::default()
    };

    content.authors = meta(&doc, "citation_author")
        .into_iter()
        .map(|name| Author {
            name,
            ..Default::default()
        })
        .collect();

    content.keywords = meta(&doc, "citation_keywords")
        .iter()
        .flat_map(|k| k.split([';', ',']))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();

    content.sections = sections(root);
    content.figures = figures(root);
    content.tables = tables(root);
    content.references = references(&doc, root);
    content.citation_callouts = callouts(root);
    content.word_count = content.sections.iter().map(Section::word_count).sum();
    content
}

fn abstract_block(root: ElementRef<'_>) -> Option<String> {
    let text = first_text(root, "#abstract, .abstract, section.abstract, div.abstract")?;
    let text = text
        .strip_prefix("Abstract")
        .map(str::trim_start)
        .unwrap_or(&text)
        .to_string();
    Some(text).filter(|t| !t.is_empty())
}

fn sections(root: ElementRef<'_>) -> Vec<Section> {
    let Some(sel) = selector("h2, h3, p") else {
        return Vec::new();
    };

    let mut sections: Vec<Section> = Vec::new();
    for el in root.select(&sel).filter(|el| !excluded(*el)) {
        let text = element_text(el);
        if text.is_empty() {
            continue;
        }
        match el.value().name() {
            "h2" => sections.push(Section {
                title: text,
                level: 1,
                ..Default::default()
            }),
            "h3" => {
                let subsection = Section {
                    title: text,
                    level: 2,
                    ..Default::default()
                };
                match sections.last_mut() {
                    Some(parent) => parent.subsections.push(subsection),
                    None => sections.push(Section {
                        level: 1,
                        ..subsection
                    }),
                }
            }
            _ => {
                if sections.is_empty() {
                    sections.push(Section {
                        level: 1,
                        ..Default::default()
                    });
                }
                if let Some(current) = sections.last_mut() {
                    match current.subsections.last_mut() {
                        Some(sub) => sub.paragraphs.push(text),
                        None => current.paragraphs.push(text),
                    }
                }
            }
        }
    }

    // Headings such as "References" that collected nothing are dropped
    sections.retain(|s| s.word_count() > 0);
    sections
}

fn figures(root: ElementRef<'_>) -> Vec<Figure> {
    let (Some(fig_sel), Some(cap_sel), Some(img_sel)) =
        (selector("figure"), selector("figcaption"), selector("img"))
    else {
        return Vec::new();
    };
    root.select(&fig_sel)
        .map(|fig| Figure {
            id: fig.value().id().map(str::to_string),
            label: None,
            caption: fig.select(&cap_sel).next().map(element_text).unwrap_or_default(),
            graphic: fig
                .select(&img_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(str::to_string),
        })
        .collect()
}

fn tables(root: ElementRef<'_>) -> Vec<Table> {
    let (Some(table_sel), Some(cap_sel)) = (selector("table"), selector("caption")) else {
        return Vec::new();
    };
    root.select(&table_sel)
        .map(|table| Table {
            id: table.value().id().map(str::to_string),
            label: None,
            caption: table.select(&cap_sel).next().map(element_text).unwrap_or_default(),
            markup: Some(table.html()),
        })
        .collect()
}

fn references(doc: &Html, root: ElementRef<'_>) -> Vec<Reference> {
    let from_meta: Vec<Reference> = meta(doc, "citation_reference")
        .into_iter()
        .map(|text| Reference {
            text: Some(text),
            ..Default::default()
        })
        .collect();
    if !from_meta.is_empty() {
        return from_meta;
    }

    let Some(sel) = selector(
        "#references li, .references li, .ref-list li, #bibliography li, ol.references li",
    ) else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    root.select(&sel)
        .map(element_text)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .map(|text| Reference {
            text: Some(text),
            ..Default::default()
        })
        .collect()
}

/// In-text links to bibliography anchors
fn callouts(root: ElementRef<'_>) -> usize {
    let Some(sel) = selector("p a[href^='#']") else {
        return 0;
    };
    root.select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_lowercase)
        .filter(|h| h.contains("ref") || h.contains("bib"))
        .count()
}

/// Visible text of an HTML page, one block per paragraph-like element
pub(crate) fn plain_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = content_root(&doc);

    let mut out = String::new();
    for node in root.descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => out.push_str("\n\n"),
            Node::Text(text) => {
                let hidden = node
                    .parent()
                    .and_then(ElementRef::wrap)
                    .is_some_and(|p| matches!(p.value().name(), "script" | "style" | "noscript"));
                if !hidden {
                    out.push_str(text);
                }
            }
            _ => {}
        }
    }

    out.split("\n\n")
        .map(collapse_whitespace)
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
