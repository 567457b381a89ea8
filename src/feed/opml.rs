use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::Cursor;
use thiserror::Error;

use crate::storage::{Feed, DEFAULT_CATEGORY};
use crate::util::validate_url;

/// Maximum nesting depth for outline elements.
const MAX_OPML_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("no feeds found")]
    NoFeeds,

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A subscription listed in an OPML document.
#[derive(Debug, Clone, PartialEq)]
pub struct OpmlEntry {
    /// `title`, else `text`, else the feed URL
    pub title: String,
    pub xml_url: String,
    /// Name of the enclosing folder outline, or [`DEFAULT_CATEGORY`]
    pub category: String,
}

/// Reads and parses an OPML file.
pub async fn parse_file(path: &std::path::Path) -> Result<Vec<OpmlEntry>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extracts subscriptions from OPML text.
///
/// A feed nested directly under an outline without `xmlUrl` takes that
/// outline's `text` (or `title`) as its category. Entries whose URL fails
/// validation are skipped with a warning. quick-xml never expands DOCTYPE
/// entities, so `&xxe;`-style references fail to unescape instead of leaking.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlEntry>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    // One slot per open outline: `Some(name)` for folders, `None` for feeds
    let mut open: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if open.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                let folder = outline.folder_name();
                if let Some(entry) = outline.into_entry(open.last()) {
                    entries.push(entry);
                }
                open.push(folder);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e, &reader)?;
                if let Some(entry) = outline.into_entry(open.last()) {
                    entries.push(entry);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if entries.is_empty() {
        return Err(OpmlError::NoFeeds);
    }
    Ok(entries)
}

#[derive(Default)]
struct Outline {
    xml_url: Option<String>,
    title: Option<String>,
    text: Option<String>,
}

impl Outline {
    /// Category name this outline provides to its children, if it is a folder.
    fn folder_name(&self) -> Option<String> {
        if self.xml_url.is_some() {
            return None;
        }
        let name = self
            .text
            .as_deref()
            .or(self.title.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);
        Some(name.to_string())
    }

    fn into_entry(self, parent: Option<&Option<String>>) -> Option<OpmlEntry> {
        let url = self.xml_url?.trim().to_string();
        if let Err(e) = validate_url(&url) {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            return None;
        }

        let category = parent
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let title = self
            .title
            .or(self.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.clone());

        Some(OpmlEntry {
            title,
            xml_url: url,
            category,
        })
    }
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, OpmlError> {
    let mut outline = Outline::default();
    let decoder = reader.decoder();

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => outline.xml_url = Some(value()?),
            b"title" => outline.title = Some(value()?),
            b"text" => outline.text = Some(value()?),
            _ => {}
        }
    }

    Ok(outline)
}

/// Renders feeds as OPML 2.0, one folder outline per category.
///
/// Categories are emitted in alphabetical order; feeds keep their input
/// order within a category.
pub fn export_opml(feeds: &[Feed]) -> Result<String> {
    let mut by_category: BTreeMap<&str, Vec<&Feed>> = BTreeMap::new();
    for feed in feeds {
        by_category.entry(feed.category.as_str()).or_default().push(feed);
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("myfeed subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for (category, feeds) in by_category {
        let mut folder = BytesStart::new("outline");
        folder.push_attribute(("text", category));
        folder.push_attribute(("title", category));
        writer
            .write_event(Event::Start(folder))
            .context("Failed to write category outline")?;

        for feed in feeds {
            let mut outline = BytesStart::new("outline");
            outline.push_attribute(("type", "rss"));
            outline.push_attribute(("text", feed.title.as_str()));
            outline.push_attribute(("title", feed.title.as_str()));
            outline.push_attribute(("xmlUrl", feed.url.as_str()));
            writer
                .write_event(Event::Empty(outline))
                .context("Failed to write outline element")?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("outline")))
            .context("Failed to write category end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}
