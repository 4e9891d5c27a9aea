//! A small owned element tree built from `quick-xml` events.
//!
//! JATS documents are walked by structure (front/body/back, nested `sec`),
//! which is awkward to do with a streaming reader alone. The tree keeps
//! element local names, raw attributes and text, and nothing else.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::ExtractError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Element {
    /// Local name, namespace prefix removed
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
        let attrs = e
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
                let value = a
                    .unescape_value_with(resolve_entity)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string());
                (key, value)
            })
            .collect();
        Self {
            name,
            attrs,
            children: Vec::new(),
        }
    }

    /// Attribute by full name (`xlink:href`) or local name (`href`)
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name || k.rsplit(':').next() == Some(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_is(&self, name: &str, value: &str) -> bool {
        self.attr(name).is_some_and(|v| v.eq_ignore_ascii_case(value))
    }

    /// Direct element children
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    /// First descendant with this name, depth-first, including `self`
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(name))
    }

    /// All descendants with this name in document order, excluding `self`
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut out = Vec::new();
        for child in self.elements() {
            child.collect_named(name, &mut out);
        }
        out
    }

    fn collect_named<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        if self.name == name {
            out.push(self);
        }
        for child in self.elements() {
            child.collect_named(name, out);
        }
    }

    /// Text content with whitespace collapsed
    pub fn text(&self) -> String {
        self.text_without(&[])
    }

    /// Text content, skipping subtrees whose element name is in `skip`
    pub fn text_without(&self, skip: &[&str]) -> String {
        let mut raw = String::new();
        self.collect_text(skip, &mut raw);
        collapse_whitespace(&raw)
    }

    fn collect_text(&self, skip: &[&str], out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) if skip.contains(&e.name.as_str()) => {}
                Node::Element(e) => {
                    // Block-level children must not run into each other
                    if is_block(&e.name) {
                        out.push(' ');
                    }
                    e.collect_text(skip, out);
                    if is_block(&e.name) {
                        out.push(' ');
                    }
                }
            }
        }
    }

    /// Serialize the subtree back to markup, local names only
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push_str(&format!(" {}=\"{}\"", k, quick_xml::escape::escape(v.as_str())));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(&quick_xml::escape::escape(t.as_str())),
                Node::Element(e) => e.write_xml(out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "sec" | "title" | "td" | "th" | "tr" | "li" | "caption" | "label" | "abstract"
    )
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Named entities common in publisher XML that are not predefined in XML
fn resolve_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => " ",
        "ndash" => "–",
        "mdash" => "—",
        "hellip" => "…",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "plusmn" => "±",
        "times" => "×",
        "deg" => "°",
        "micro" => "µ",
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        _ => return quick_xml::escape::resolve_predefined_entity(name),
    })
}

/// Parse XML into a synthetic `#document` element holding the top-level nodes.
///
/// Mismatched end tags close back to the nearest matching open element, so
/// slightly broken publisher markup still yields a tree.
pub(crate) fn parse(xml: &str) -> Result<Element, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<Element> = vec![Element {
        name: "#document".to_string(),
        ..Default::default()
    }];

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(Element::from_start(e)),
            Ok(Event::Empty(ref e)) => {
                let element = Element::from_start(e);
                push_node(&mut stack, Node::Element(element));
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape_with(resolve_entity)
                    .or_else(|_| e.unescape())
                    .map(|t| t.to_string())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).to_string());
                if !text.is_empty() {
                    push_node(&mut stack, Node::Text(text));
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).to_string();
                push_node(&mut stack, Node::Text(text));
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                // Stray end tags with no open counterpart are ignored
                if stack.iter().skip(1).any(|el| el.name == name) {
                    while stack.len() > 1 {
                        let closed = stack.pop().unwrap_or_default();
                        let done = closed.name == name;
                        push_node(&mut stack, Node::Element(closed));
                        if done {
                            break;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    // Close anything left open at EOF
    while stack.len() > 1 {
        let closed = stack.pop().unwrap_or_default();
        push_node(&mut stack, Node::Element(closed));
    }

    let document = stack.pop().unwrap_or_default();
    if document.elements().next().is_none() {
        return Err(ExtractError::Xml("no root element".to_string()));
    }
    Ok(document)
}

fn push_node(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let doc = parse(
            r#"<?xml version="1.0"?>
            <article xmlns:xlink="http://www.w3.org/1999/xlink">
              <body><sec id="s1"><title>Intro</title><p>Hello <italic>world</italic>.</p></sec></body>
              <fig><graphic xlink:href="f1.jpg"/></fig>
            </article>"#,
        )
        .unwrap();

        let article = doc.find("article").unwrap();
        let sec = article.find("sec").unwrap();
        assert_eq!(sec.attr("id"), Some("s1"));
        assert_eq!(sec.child("p").unwrap().text(), "Hello world.");
        assert_eq!(article.find("graphic").unwrap().attr("href"), Some("f1.jpg"));
        assert_eq!(article.find_all("p").len(), 1);
    }

    #[test]
    fn test_text_separates_blocks_and_skips() {
        let doc = parse("<sec><title>Methods</title><p>One.</p><fig><caption>Cap</caption></fig><p>Two.</p></sec>").unwrap();
        let sec = doc.find("sec").unwrap();
        assert_eq!(sec.text_without(&["fig"]), "Methods One. Two.");
    }

    #[test]
    fn test_entities_and_mismatched_tags() {
        let doc = parse("<p>a&nbsp;&amp;&#x3B1;<b>bold</p>").unwrap();
        assert_eq!(doc.find("p").unwrap().text(), "a &αbold");
    }

    #[test]
    fn test_to_xml_round_trips_markup() {
        let doc = parse(r#"<table><tr><td a="1">x &lt; y</td></tr></table>"#).unwrap();
        assert_eq!(
            doc.find("table").unwrap().to_xml(),
            r#"<table><tr><td a="1">x &lt; y</td></tr></table>"#
        );
    }

    #[test]
    fn test_not_xml() {
        assert!(parse("just some text").is_err());
    }
}
