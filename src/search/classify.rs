//! Query classification: identifier lookup, keyword or hybrid.

use crate::models::{Identifier, QueryKind};

/// Characters stripped from the edges of a token before identifier parsing
const TOKEN_EDGES: &[char] = &['(', ')', '[', ']', '"', '\'', ',', ';'];

/// Classify query text.
///
/// A query that is exactly one identifier is a lookup; identifiers mixed with
/// other words (or several identifiers) make a hybrid query; anything else is
/// a keyword search.
pub fn classify(text: &str) -> QueryKind {
    let mut identifiers: Vec<Identifier> = Vec::new();
    let mut remainder: Vec<&str> = Vec::new();

    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let trimmed = token.trim_matches(TOKEN_EDGES);

        // "PMID: 31452104" splits into two tokens
        let lower = trimmed.to_lowercase();
        if lower == "pmid" || lower == "pmid:" {
            if let Some(id) = tokens
                .peek()
                .and_then(|next| Identifier::pmid(next.trim_matches(TOKEN_EDGES)))
            {
                tokens.next();
                push_unique(&mut identifiers, id);
                continue;
            }
        }

        match Identifier::parse(trimmed) {
            Some(id) => push_unique(&mut identifiers, id),
            None => remainder.push(token),
        }
    }

    let remainder = remainder.join(" ");
    match identifiers.len() {
        0 => QueryKind::Keyword,
        1 if remainder.is_empty() => QueryKind::IdentifierLookup {
            identifier: identifiers.remove(0),
        },
        _ => QueryKind::Hybrid {
            identifiers,
            remainder,
        },
    }
}

fn push_unique(identifiers: &mut Vec<Identifier>, id: Identifier) {
    if !identifiers.contains(&id) {
        identifiers.push(id);
    }
}
