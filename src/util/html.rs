//! Markup-to-text helpers shared by feed normalization and content extraction.

use scraper::{Html, Node};

/// Elements that start a new line when flattening feed HTML to text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p",
    "br",
    "li",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "blockquote",
];

/// Text content of an HTML fragment, trimmed.
///
/// Used for teasers, where layout does not matter.
pub fn strip_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}

/// Flattens an HTML fragment to readable text, keeping paragraph breaks.
///
/// A newline is emitted before each block element, runs of three or more
/// newlines shrink to a blank line, and spaces/tabs collapse to one space.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(html);
    let mut raw = String::with_capacity(html.len());
    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => raw.push('\n'),
            Node::Text(text) => raw.push_str(text),
            _ => {}
        }
    }

    normalize_breaks(&raw)
}

/// Collapses horizontal whitespace and limits consecutive newlines to two.
fn normalize_breaks(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut newlines = 0usize;
    let mut pending_space = false;

    for c in raw.chars() {
        match c {
            '\n' => {
                newlines += 1;
                pending_space = false;
            }
            ' ' | '\t' | '\r' => pending_space = true,
            c => {
                if newlines > 0 {
                    if !out.is_empty() {
                        out.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
                    }
                } else if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                newlines = 0;
                pending_space = false;
                out.push(c);
            }
        }
    }

    out
}
