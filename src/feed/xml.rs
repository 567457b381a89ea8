//! Minimal owned element tree built from `quick-xml` events.
//!
//! Feeds are small (capped at 10 MB before they get here) and need
//! child/attribute lookups in arbitrary order, which the streaming reader
//! does not offer.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Nesting limit for feed documents.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Document has no root element")]
    NoRoot,

    #[error("XML nesting depth exceeds maximum of {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    /// Qualified name as written, e.g. `content:encoded`.
    pub name: String,
    /// Name without namespace prefix, e.g. `encoded`.
    pub local: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    /// First direct child with the given qualified name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.name == name)
    }

    /// First direct child with the given local name, any prefix.
    pub fn child_local(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.local == local)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.child_elements().filter(move |e| e.name == name)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// All descendants (excluding `self`) with the given qualified name,
    /// in document order.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        let mut stack: Vec<&Element> = self.child_elements().collect();
        stack.reverse();
        while let Some(el) = stack.pop() {
            if el.name == name {
                found.push(el);
            }
            let start = stack.len();
            stack.extend(el.child_elements());
            stack[start..].reverse();
        }
        found
    }

    /// Whether `self` or any descendant has the given qualified name.
    pub fn contains(&self, name: &str) -> bool {
        self.name == name || !self.descendants_named(name).is_empty()
    }

    /// Attribute value by local name.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == local || k.rsplit(':').next() == Some(local))
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(t) => out.push_str(t),
                XmlNode::Element(e) => e.collect_text(out),
            }
        }
    }
}

/// Parses a document into its root element.
///
/// Text that fails entity unescaping (HTML entities such as `&nbsp;` are
/// common in feeds) is kept raw so the HTML layer can decode it later.
pub fn parse_document(xml: &str) -> Result<Element, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Malformed(format!("at byte {}: {e}", reader.buffer_position())))?;

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(XmlError::TooDeep(MAX_DEPTH));
                }
                stack.push(start_element(&e, &reader));
            }
            Event::Empty(e) => {
                let el = start_element(&e, &reader);
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(e) => {
                if let Some(parent) = stack.last_mut() {
                    let text = match e.unescape() {
                        Ok(t) => t.into_owned(),
                        Err(_) => String::from_utf8_lossy(&e).into_owned(),
                    };
                    push_text(parent, text);
                }
            }
            Event::CData(e) => {
                if let Some(parent) = stack.last_mut() {
                    push_text(parent, String::from_utf8_lossy(&e).into_owned());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmlError::Malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or(XmlError::NoRoot)
}

fn start_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Element {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = match attr {
            Ok(a) => a,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed XML attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attrs.push((key, value));
    }

    Element {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        local: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        attrs,
        children: Vec::new(),
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(el)),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

fn push_text(parent: &mut Element, text: String) {
    // Adjacent text and CDATA sections merge into one node
    if let Some(XmlNode::Text(prev)) = parent.children.last_mut() {
        prev.push_str(&text);
    } else {
        parent.children.push(XmlNode::Text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_and_lookups() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
<rss xmlns:dc="http://purl.org/dc/elements/1.1/"><channel>
  <title>Blog</title>
  <item><title>A</title><dc:creator>Ann</dc:creator></item>
  <item><title>B</title><link href="https://example.com/b"/></item>
</channel></rss>"#,
        )
        .unwrap();

        assert_eq!(root.name, "rss");
        let channel = root.child("channel").unwrap();
        assert_eq!(channel.child("title").unwrap().text(), "Blog");

        let items = root.descendants_named("item");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].child_local("creator").unwrap().text(), "Ann");
        assert_eq!(items[0].child("dc:creator").unwrap().local, "creator");
        assert_eq!(
            items[1].child("link").unwrap().attr("href"),
            Some("https://example.com/b")
        );
    }

    #[test]
    fn test_cdata_and_entities() {
        let root = parse_document(
            "<a><b><![CDATA[<p>Hi</p>]]></b><c>Fish &amp; chips</c><d>a&nbsp;b</d></a>",
        )
        .unwrap();
        assert_eq!(root.child("b").unwrap().text(), "<p>Hi</p>");
        assert_eq!(root.child("c").unwrap().text(), "Fish & chips");
        assert_eq!(root.child("d").unwrap().text(), "a&nbsp;b");
    }

    #[test]
    fn test_descendants_in_document_order() {
        let root = parse_document("<r><x id='1'><x id='2'/></x><y><x id='3'/></y></r>").unwrap();
        let ids: Vec<_> = root
            .descendants_named("x")
            .iter()
            .map(|e| e.attr("id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(root.contains("y"));
        assert!(!root.contains("z"));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse_document("<not valid xml").is_err());
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a><b>").is_err());
        assert!(matches!(parse_document("   "), Err(XmlError::NoRoot)));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}{}", "<x>".repeat(MAX_DEPTH + 1), "</x>".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse_document(&deep), Err(XmlError::TooDeep(_))));
    }
}
