//! JATS (NLM Journal Article Tag Suite) walk over the element tree.

use std::collections::{BTreeSet, HashMap};

use super::xml_tree::{collapse_whitespace, Element};
use crate::models::{Author, Figure, FullTextContent, Reference, Section, Table};
use crate::utils::{normalize_doi, normalize_pmcid, normalize_pmid};

/// Subtrees excluded from paragraph text; they are captured separately
const PARAGRAPH_SKIP: &[&str] = &["fig", "table-wrap", "fig-group", "table-wrap-group"];

/// Walk an `<article>` (or bare `<body>`) element into a document.
///
/// Scores are left at zero; the caller fills them in.
pub(crate) fn walk(root: &Element) -> FullTextContent {
    let mut content = FullTextContent::default();

    if let Some(front) = root.child("front") {
        read_front(front, &mut content);
    }

    let body = if root.name == "body" {
        Some(root)
    } else {
        root.child("body")
    };
    if let Some(body) = body {
        content.sections = read_body(body);
        content.citation_callouts = body
            .find_all("xref")
            .into_iter()
            .filter(|x| x.attr_is("ref-type", "bibr"))
            .count();
    }

    for section in &content.sections {
        for s in section.walk() {
            content.figures.extend(s.figures.iter().cloned());
            content.tables.extend(s.tables.iter().cloned());
        }
    }
    // Floats collected outside the body (PMC "floats-group")
    if let Some(floats) = root.child("floats-group") {
        content.figures.extend(floats.find_all("fig").into_iter().map(read_figure));
        content
            .tables
            .extend(floats.find_all("table-wrap").into_iter().map(read_table));
    }

    if let Some(back) = root.child("back") {
        content.references = back
            .find_all("ref")
            .into_iter()
            .map(read_reference)
            .collect();
    }

    content.word_count = content.sections.iter().map(Section::word_count).sum();
    content
}

fn read_front(front: &Element, content: &mut FullTextContent) {
    if let Some(journal) = front.child("journal-meta") {
        content.journal = journal
            .find("journal-title")
            .map(Element::text)
            .filter(|t| !t.is_empty());
    }

    let Some(meta) = front.child("article-meta") else {
        return;
    };

    content.title = meta
        .child("title-group")
        .and_then(|g| g.child("article-title"))
        .map(Element::text)
        .unwrap_or_default();

    // Prefer the main abstract over graphical/teaser variants
    let abstracts: Vec<&Element> = meta.children_named("abstract").collect();
    let main = abstracts
        .iter()
        .find(|a| a.attr("abstract-type").is_none())
        .or_else(|| abstracts.first());
    if let Some(abs) = main {
        content.abstract_text = read_abstract(abs);
    }

    content.keywords = meta
        .find_all("kwd")
        .into_iter()
        .map(Element::text)
        .filter(|k| !k.is_empty())
        .collect::<BTreeSet<_>>();

    let affiliations = affiliation_map(front);
    content.authors = meta
        .find_all("contrib")
        .into_iter()
        .filter(|c| c.attr("contrib-type").map_or(true, |t| t == "author"))
        .filter_map(|c| read_author(c, &affiliations))
        .collect();

    content.year = read_year(meta);

    for id in meta.children_named("article-id") {
        let value = id.text();
        match id.attr("pub-id-type") {
            Some("doi") => content.doi = normalize_doi(&value).ok().or(Some(value)),
            Some("pmid") => content.pmid = normalize_pmid(&value).ok(),
            Some("pmc") | Some("pmcid") => content.pmc_id = normalize_pmcid(&value).ok(),
            _ => {}
        }
    }
}

fn read_abstract(abs: &Element) -> String {
    let paragraphs: Vec<String> = abs
        .find_all("p")
        .into_iter()
        .map(Element::text)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        abs.text_without(&["title"])
    } else {
        paragraphs.join(" ")
    }
}

/// `aff` id → display text, label digits removed
fn affiliation_map(front: &Element) -> HashMap<String, String> {
    front
        .find_all("aff")
        .into_iter()
        .filter_map(|aff| {
            let id = aff.attr("id")?;
            Some((id.to_string(), aff.text_without(&["label", "sup"])))
        })
        .collect()
}

fn read_author(contrib: &Element, affiliations: &HashMap<String, String>) -> Option<Author> {
    let mut author = Author::default();

    if let Some(name) = contrib.find("name") {
        author.surname = name.child("surname").map(Element::text).filter(|s| !s.is_empty());
        author.given_names = name
            .child("given-names")
            .map(Element::text)
            .filter(|s| !s.is_empty());
        author.name = [author.given_names.as_deref(), author.surname.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
    } else if let Some(name) = contrib.find("string-name").or_else(|| contrib.find("collab")) {
        author.name = name.text();
    }

    if author.name.is_empty() {
        return None;
    }

    for xref in contrib.children_named("xref").filter(|x| x.attr_is("ref-type", "aff")) {
        // rid may list several ids separated by spaces
        for rid in xref.attr("rid").unwrap_or_default().split_whitespace() {
            if let Some(text) = affiliations.get(rid) {
                if !author.affiliations.contains(text) {
                    author.affiliations.push(text.clone());
                }
            }
        }
    }
    for aff in contrib.children_named("aff") {
        author.affiliations.push(aff.text_without(&["label"]));
    }

    author.orcid = contrib
        .children_named("contrib-id")
        .find(|c| c.attr_is("contrib-id-type", "orcid"))
        .map(|c| c.text().trim_start_matches("https://orcid.org/").to_string());
    author.email = contrib.find("email").map(Element::text);

    Some(author)
}

fn read_year(meta: &Element) -> Option<i32> {
    let dates: Vec<&Element> = meta.children_named("pub-date").collect();
    let preferred = ["epub", "pub", "ppub", "collection"];

    preferred
        .iter()
        .find_map(|p| dates.iter().find(|d| date_kind(d) == Some(*p)))
        .or_else(|| dates.first())
        .and_then(|d| d.child("year"))
        .and_then(|y| y.text().parse().ok())
}

fn date_kind(date: &Element) -> Option<&str> {
    date.attr("pub-type").or_else(|| date.attr("date-type"))
}

fn read_body(body: &Element) -> Vec<Section> {
    let mut sections: Vec<Section> = body.children_named("sec").map(|s| read_section(s, 1)).collect();

    // Articles without <sec> keep their paragraphs in an untitled section
    let loose = direct_paragraphs(body);
    let loose_figures = direct_figures(body);
    let loose_tables = direct_tables(body);
    if !loose.is_empty() || !loose_figures.is_empty() || !loose_tables.is_empty() {
        sections.insert(
            0,
            Section {
                level: 1,
                paragraphs: loose,
                figures: loose_figures,
                tables: loose_tables,
                ..Default::default()
            },
        );
    }
    sections
}

fn read_section(sec: &Element, level: usize) -> Section {
    Section {
        id: sec.attr("id").map(str::to_string),
        title: sec.child("title").map(Element::text).unwrap_or_default(),
        level,
        section_type: sec.attr("sec-type").map(str::to_string),
        paragraphs: direct_paragraphs(sec),
        figures: direct_figures(sec),
        tables: direct_tables(sec),
        subsections: sec
            .children_named("sec")
            .map(|s| read_section(s, level + 1))
            .collect(),
    }
}

fn direct_paragraphs(parent: &Element) -> Vec<String> {
    parent
        .children_named("p")
        .map(|p| p.text_without(PARAGRAPH_SKIP))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Figures placed directly in `parent`, in a `fig-group`, or inline in a paragraph
fn direct_figures(parent: &Element) -> Vec<Figure> {
    floats(parent, "fig", "fig-group").into_iter().map(read_figure).collect()
}

fn direct_tables(parent: &Element) -> Vec<Table> {
    floats(parent, "table-wrap", "table-wrap-group")
        .into_iter()
        .map(read_table)
        .collect()
}

fn floats<'a>(parent: &'a Element, name: &str, group: &str) -> Vec<&'a Element> {
    let mut out = Vec::new();
    for child in parent.elements() {
        if child.name == name {
            out.push(child);
        } else if child.name == group || child.name == "p" {
            out.extend(child.elements().filter(|e| e.name == name));
        }
    }
    out
}

fn read_figure(fig: &Element) -> Figure {
    Figure {
        id: fig.attr("id").map(str::to_string),
        label: fig.child("label").map(Element::text),
        caption: fig.child("caption").map(Element::text).unwrap_or_default(),
        graphic: fig
            .find("graphic")
            .and_then(|g| g.attr("href"))
            .map(str::to_string),
    }
}

fn read_table(wrap: &Element) -> Table {
    Table {
        id: wrap.attr("id").map(str::to_string),
        label: wrap.child("label").map(Element::text),
        caption: wrap.child("caption").map(Element::text).unwrap_or_default(),
        markup: wrap.find("table").map(Element::to_xml),
    }
}

fn read_reference(reference: &Element) -> Reference {
    let citation = ["element-citation", "mixed-citation", "nlm-citation", "citation"]
        .iter()
        .find_map(|name| reference.find(name));

    let mut out = Reference {
        id: reference.attr("id").map(str::to_string),
        label: reference.child("label").map(Element::text),
        ..Default::default()
    };

    let Some(citation) = citation else {
        out.text = Some(reference.text_without(&["label"])).filter(|t| !t.is_empty());
        return out;
    };

    out.authors = citation
        .find_all("name")
        .into_iter()
        .map(|n| {
            let surname = n.child("surname").map(Element::text).unwrap_or_default();
            match n.child("given-names").map(Element::text) {
                Some(given) if !given.is_empty() => format!("{} {}", surname, given),
                _ => surname,
            }
        })
        .chain(
            citation
                .find_all("string-name")
                .into_iter()
                .filter(|n| n.child("surname").is_none())
                .map(Element::text),
        )
        .filter(|n| !n.is_empty())
        .collect();

    let field = |name: &str| {
        citation
            .find(name)
            .map(Element::text)
            .filter(|t| !t.is_empty())
    };
    out.title = field("article-title").or_else(|| field("chapter-title"));
    out.source = field("source");
    out.year = field("year");

    for id in citation.find_all("pub-id") {
        match id.attr("pub-id-type") {
            Some("doi") => out.doi = Some(id.text()),
            Some("pmid") => out.pmid = Some(id.text()),
            _ => {}
        }
    }

    if citation.name == "mixed-citation" {
        out.text = Some(collapse_whitespace(&citation.text())).filter(|t| !t.is_empty());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::xml_tree;

    const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE article PUBLIC "-//NLM//DTD JATS (Z39.96) Journal Archiving and Interchange DTD v1.2 20190208//EN" "JATS-archivearticle1.dtd">
<article xmlns:xlink="http://www.w3.org/1999/xlink" article-type="research-article">
  <front>
    <journal-meta><journal-title-group><journal-title>Genome Biology</journal-title></journal-title-group></journal-meta>
    <article-meta>
      <article-id pub-id-type="pmid">31452104</article-id>
      <article-id pub-id-type="pmc">6700001</article-id>
      <article-id pub-id-type="doi">10.1186/s13059-019-1700-0</article-id>
      <title-group><article-title>Single-cell atlas of the <italic>mouse</italic> liver</article-title></title-group>
      <contrib-group>
        <contrib contrib-type="author">
          <contrib-id contrib-id-type="orcid">https://orcid.org/0000-0002-1825-0097</contrib-id>
          <name><surname>Doe</surname><given-names>Jane</given-names></name>
          <xref ref-type="aff" rid="aff1">1</xref>
        </contrib>
        <contrib contrib-type="editor"><name><surname>Ed</surname><given-names>Itor</given-names></name></contrib>
        <aff id="aff1"><label>1</label>Department of Genetics, Example University</aff>
      </contrib-group>
      <pub-date pub-type="ppub"><year>2018</year></pub-date>
      <pub-date pub-type="epub"><day>1</day><month>8</month><year>2019</year></pub-date>
      <abstract><p>We profile hepatocytes.</p><p>Zonation is described.</p></abstract>
      <abstract abstract-type="graphical"><p>Graphical.</p></abstract>
      <kwd-group><kwd>scRNA-seq</kwd><kwd>liver</kwd></kwd-group>
    </article-meta>
  </front>
  <body>
    <sec id="s1"><title>Introduction</title><p>The liver is zonated <xref ref-type="bibr" rid="r1">1</xref>.</p></sec>
    <sec id="s2" sec-type="methods"><title>Methods</title>
      <sec id="s2.1"><title>Sequencing</title><p>Cells were sequenced <xref ref-type="bibr" rid="r2">2</xref>.
        <fig id="f1"><label>Figure 1</label><caption><p>UMAP of cells.</p></caption><graphic xlink:href="f1.jpg"/></fig></p>
        <table-wrap id="t1"><label>Table 1</label><caption><p>Samples.</p></caption><table><tr><td>n</td></tr></table></table-wrap>
      </sec>
    </sec>
  </body>
  <back>
    <ref-list>
      <ref id="r1"><label>1</label><element-citation publication-type="journal">
        <person-group><name><surname>Halpern</surname><given-names>KB</given-names></name></person-group>
        <article-title>Single-cell spatial reconstruction</article-title><source>Nature</source><year>2017</year>
        <pub-id pub-id-type="doi">10.1038/nature21065</pub-id><pub-id pub-id-type="pmid">28166538</pub-id>
      </element-citation></ref>
      <ref id="r2"><mixed-citation>Smith A. A method. Cell. 2020.</mixed-citation></ref>
    </ref-list>
  </back>
</article>"#;

    fn walk_article() -> FullTextContent {
        let doc = xml_tree::parse(ARTICLE).unwrap();
        walk(doc.find("article").unwrap())
    }

    #[test]
    fn test_front_matter() {
        let c = walk_article();
        assert_eq!(c.title, "Single-cell atlas of the mouse liver");
        assert_eq!(c.journal.as_deref(), Some("Genome Biology"));
        assert_eq!(c.abstract_text, "We profile hepatocytes. Zonation is described.");
        assert_eq!(c.year, Some(2019));
        assert_eq!(c.pmid.as_deref(), Some("31452104"));
        assert_eq!(c.pmc_id.as_deref(), Some("PMC6700001"));
        assert_eq!(c.doi.as_deref(), Some("10.1186/s13059-019-1700-0"));
        assert!(c.keywords.contains("liver"));

        assert_eq!(c.authors.len(), 1);
        let author = &c.authors[0];
        assert_eq!(author.name, "Jane Doe");
        assert_eq!(author.orcid.as_deref(), Some("0000-0002-1825-0097"));
        assert_eq!(author.affiliations, vec!["Department of Genetics, Example University"]);
    }

    #[test]
    fn test_body_sections_and_floats() {
        let c = walk_article();
        assert_eq!(c.sections.len(), 2);
        let methods = &c.sections[1];
        assert_eq!(methods.section_type.as_deref(), Some("methods"));
        assert_eq!(methods.subsections[0].level, 2);
        assert_eq!(methods.subsections[0].paragraphs, vec!["Cells were sequenced 2."]);

        assert_eq!(c.figures.len(), 1);
        assert_eq!(c.figures[0].caption, "UMAP of cells.");
        assert_eq!(c.figures[0].graphic.as_deref(), Some("f1.jpg"));
        assert_eq!(c.tables.len(), 1);
        assert_eq!(c.tables[0].markup.as_deref(), Some("<table><tr><td>n</td></tr></table>"));
        assert_eq!(c.citation_callouts, 2);
    }

    #[test]
    fn test_references() {
        let c = walk_article();
        assert_eq!(c.references.len(), 2);
        let first = &c.references[0];
        assert_eq!(first.authors, vec!["Halpern KB"]);
        assert_eq!(first.source.as_deref(), Some("Nature"));
        assert_eq!(first.pmid.as_deref(), Some("28166538"));
        assert_eq!(
            c.references[1].text.as_deref(),
            Some("Smith A. A method. Cell. 2020.")
        );
    }

    #[test]
    fn test_body_without_sections() {
        let doc = xml_tree::parse("<article><body><p>Only a paragraph.</p></body></article>").unwrap();
        let c = walk(doc.find("article").unwrap());
        assert_eq!(c.sections.len(), 1);
        assert!(c.sections[0].title.is_empty());
        assert_eq!(c.word_count, 3);
    }

    #[test]
    fn test_floats_in_groups_and_paragraphs() {
        let doc = xml_tree::parse(
            r#"<sec><table-wrap-group><table-wrap id="t1"/><table-wrap id="t2"/></table-wrap-group>
            <p>See <table-wrap id="t3"/></p><table-wrap id="t4"/><fig-group><fig id="f1"/></fig-group></sec>"#,
        )
        .unwrap();
        let sec = doc.find("sec").unwrap();
        let ids: Vec<&str> = floats(sec, "table-wrap", "table-wrap-group")
            .into_iter()
            .filter_map(|t| t.attr("id"))
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
        assert_eq!(direct_figures(sec).len(), 1);
    }
}
