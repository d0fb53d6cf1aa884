//! Query grammar parser.
//!
//! The search surface accepts a small grammar on top of free text:
//!
//! - `"exact phrase"` — preserved as one unit
//! - `@yesterday`, `@2024-11` — temporal markers
//! - `#notes` — bucket selectors
//! - anything else — bare keywords
//!
//! The Tag-Walker feeds the union of phrases and keywords to the FTS call;
//! bucket selectors merge with the caller's bucket filter.

/// Parsed query parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub temporal: Vec<String>,
    pub buckets: Vec<String>,
    pub keywords: Vec<String>,
}

impl ParsedQuery {
    /// The text handed to full-text search: phrases and keywords joined.
    pub fn fts_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.phrases.iter().map(|s| s.as_str()));
        parts.extend(self.keywords.iter().map(|s| s.as_str()));
        parts.join(" ")
    }
}

/// Parse a raw query string into its grammar parts.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut rest = raw;

    // Pull out double-quoted phrases first
    while let Some(open) = rest.find('"') {
        let before = &rest[..open];
        collect_tokens(before, &mut parsed);

        let after_open = &rest[open + 1..];
        match after_open.find('"') {
            Some(close) => {
                let phrase = after_open[..close].trim();
                if !phrase.is_empty() {
                    parsed.phrases.push(phrase.to_string());
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Unbalanced quote: treat the remainder as plain tokens
                collect_tokens(after_open, &mut parsed);
                rest = "";
            }
        }
    }
    collect_tokens(rest, &mut parsed);

    parsed
}

fn collect_tokens(text: &str, parsed: &mut ParsedQuery) {
    for token in text.split_whitespace() {
        if let Some(temporal) = token.strip_prefix('@') {
            if !temporal.is_empty() {
                parsed.temporal.push(temporal.to_string());
            }
        } else if let Some(bucket) = token.strip_prefix('#') {
            if !bucket.is_empty() {
                parsed.buckets.push(bucket.to_string());
            }
        } else {
            parsed.keywords.push(token.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_keywords() {
        let q = parse_query("memory graph engine");
        assert_eq!(q.keywords, vec!["memory", "graph", "engine"]);
        assert!(q.phrases.is_empty());
        assert_eq!(q.fts_text(), "memory graph engine");
    }

    #[test]
    fn quoted_phrases_are_preserved() {
        let q = parse_query(r#"find "atomic taxonomy" quickly"#);
        assert_eq!(q.phrases, vec!["atomic taxonomy"]);
        assert_eq!(q.keywords, vec!["find", "quickly"]);
        assert_eq!(q.fts_text(), "atomic taxonomy find quickly");
    }

    #[test]
    fn markers_are_separated() {
        let q = parse_query("deploy notes @yesterday #work #notes");
        assert_eq!(q.temporal, vec!["yesterday"]);
        assert_eq!(q.buckets, vec!["work", "notes"]);
        assert_eq!(q.keywords, vec!["deploy", "notes"]);
    }

    #[test]
    fn unbalanced_quote_degrades_to_tokens() {
        let q = parse_query(r#"broken "phrase start here"#);
        assert!(q.phrases.is_empty());
        assert_eq!(q.keywords, vec!["broken", "phrase", "start", "here"]);
    }

    #[test]
    fn empty_query() {
        let q = parse_query("   ");
        assert_eq!(q, ParsedQuery::default());
        assert_eq!(q.fts_text(), "");
    }
}
