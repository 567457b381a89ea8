use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::xml::{parse_document, Element, XmlError};
use crate::util::{html_to_text, strip_html, truncate_chars};

/// Teaser length in characters.
pub const TEASER_CHARS: usize = 280;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Converter reported failure: {0}")]
    ConverterStatus(String),

    #[error("Document is neither RSS nor Atom (root <{0}>)")]
    UnknownFormat(String),
}

/// One feed entry normalized from any source format.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeedItem {
    pub title: String,
    pub link: Option<String>,
    /// Markup-free text, at most 280 chars.
    pub teaser: String,
    /// Markup-free text with paragraph breaks, `None` when the entry has none.
    pub full_text: Option<String>,
    /// Unix seconds.
    pub published: Option<i64>,
    pub author: Option<String>,
    pub guid: String,
}

/// A fetched document reduced to the fields ingestion needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFeed {
    pub title: String,
    pub description: String,
    pub items: Vec<RawFeedItem>,
}

/// A parsed feed in one of the three shapes the proxies hand back.
#[derive(Debug)]
pub enum FeedDocument {
    Rss(Element),
    Atom(Element),
    Json(ConverterFeed),
}

/// Response of the JSON feed-conversion proxy.
#[derive(Debug, Deserialize)]
pub struct ConverterFeed {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub feed: ConverterMeta,
    #[serde(default)]
    pub items: Vec<ConverterItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConverterMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConverterItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
    pub author: Option<String>,
    pub guid: Option<String>,
}

impl FeedDocument {
    /// Detects the format of an XML document: a root `<feed>` is Atom, any
    /// `<channel>` element is RSS.
    pub fn from_xml(xml: &str) -> Result<Self, ParseError> {
        let root = parse_document(xml)?;
        if root.local == "feed" {
            Ok(Self::Atom(root))
        } else if root.contains("channel") {
            Ok(Self::Rss(root))
        } else {
            Err(ParseError::UnknownFormat(root.name))
        }
    }

    /// Parses a conversion-proxy response. Any status other than `ok` fails.
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        let feed: ConverterFeed = serde_json::from_slice(body)?;
        if feed.status != "ok" {
            return Err(ParseError::ConverterStatus(
                feed.message.unwrap_or(feed.status),
            ));
        }
        Ok(Self::Json(feed))
    }

    /// Normalizes the document, keeping at most `max_items` entries.
    ///
    /// `feed_url` stands in for a missing feed title.
    pub fn into_feed(self, feed_url: &str, max_items: usize) -> FetchedFeed {
        match self {
            Self::Rss(root) => normalize_rss(&root, feed_url, max_items),
            Self::Atom(root) => normalize_atom(&root, feed_url, max_items),
            Self::Json(feed) => normalize_json(feed, feed_url, max_items),
        }
    }
}

fn normalize_rss(root: &Element, feed_url: &str, max_items: usize) -> FetchedFeed {
    let channel = root
        .descendants_named("channel")
        .into_iter()
        .next()
        .or_else(|| (root.name == "channel").then_some(root));

    let title = channel.and_then(|c| child_text(c, "title"));
    let description = channel.and_then(|c| child_text(c, "description"));

    // RSS 1.0 puts items beside the channel rather than inside it
    let items = root
        .descendants_named("item")
        .into_iter()
        .take(max_items)
        .map(|item| {
            let link = child_text(item, "link")
                .or_else(|| item.child("link").and_then(|l| l.attr("href")).map(str::to_string));
            let raw = item
                .child_local("encoded")
                .map(Element::text)
                .filter(|s| !s.trim().is_empty())
                .or_else(|| raw_text(item, "content"))
                .or_else(|| raw_text(item, "description"))
                .unwrap_or_default();
            let published = child_text(item, "pubDate")
                .or_else(|| item.child_local("date").map(Element::text))
                .and_then(|d| parse_date(&d));
            let author = child_text(item, "author")
                .or_else(|| item.child_local("creator").map(|c| c.text().trim().to_string()))
                .filter(|s| !s.is_empty());

            build_item(
                child_text(item, "title"),
                link,
                &raw,
                &raw,
                published,
                author,
                child_text(item, "guid"),
            )
        })
        .collect();

    FetchedFeed {
        title: title.unwrap_or_else(|| feed_url.to_string()),
        description: description.unwrap_or_default(),
        items,
    }
}

fn normalize_atom(root: &Element, feed_url: &str, max_items: usize) -> FetchedFeed {
    let items = root
        .descendants_named("entry")
        .into_iter()
        .take(max_items)
        .map(|entry| {
            let link = entry
                .children_named("link")
                .find(|l| matches!(l.attr("rel"), None | Some("alternate")))
                .or_else(|| entry.child("link"))
                .and_then(|l| l.attr("href"))
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty());
            let raw = raw_text(entry, "content")
                .or_else(|| raw_text(entry, "summary"))
                .unwrap_or_default();
            let published = child_text(entry, "updated")
                .or_else(|| child_text(entry, "published"))
                .and_then(|d| parse_date(&d));
            let author = entry.child("author").and_then(|a| child_text(a, "name"));

            build_item(
                child_text(entry, "title"),
                link,
                &raw,
                &raw,
                published,
                author,
                child_text(entry, "id"),
            )
        })
        .collect();

    FetchedFeed {
        title: child_text(root, "title").unwrap_or_else(|| feed_url.to_string()),
        description: child_text(root, "subtitle").unwrap_or_default(),
        items,
    }
}

fn normalize_json(feed: ConverterFeed, feed_url: &str, max_items: usize) -> FetchedFeed {
    let items = feed
        .items
        .into_iter()
        .take(max_items)
        .map(|item| {
            let description = non_empty(item.description);
            let content = non_empty(item.content);
            let teaser_src = description.clone().or_else(|| content.clone()).unwrap_or_default();
            let full_src = content.or(description).unwrap_or_default();
            let published = item.pub_date.as_deref().and_then(parse_date);

            build_item(
                non_empty(item.title).map(|t| t.trim().to_string()),
                non_empty(item.link).map(|l| l.trim().to_string()),
                &teaser_src,
                &full_src,
                published,
                non_empty(item.author),
                non_empty(item.guid),
            )
        })
        .collect();

    FetchedFeed {
        title: non_empty(feed.feed.title).unwrap_or_else(|| feed_url.to_string()),
        description: feed.feed.description.unwrap_or_default(),
        items,
    }
}

fn build_item(
    title: Option<String>,
    link: Option<String>,
    teaser_src: &str,
    full_src: &str,
    published: Option<i64>,
    author: Option<String>,
    guid: Option<String>,
) -> RawFeedItem {
    let title = title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let teaser = truncate_chars(&strip_html(teaser_src), TEASER_CHARS).to_string();
    let full_text = Some(html_to_text(full_src)).filter(|t| !t.is_empty());
    let guid = generate_guid(guid.as_deref(), link.as_deref(), &title, published);

    RawFeedItem {
        title,
        link,
        teaser,
        full_text,
        published,
        author,
        guid,
    }
}

/// Trimmed text of a direct child, `None` when absent or blank.
fn child_text(el: &Element, name: &str) -> Option<String> {
    el.child(name)
        .map(|c| c.text().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Untrimmed text of a direct child, `None` when absent or blank.
fn raw_text(el: &Element, name: &str) -> Option<String> {
    el.child(name).map(Element::text).filter(|s| !s.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses RFC 2822, RFC 3339, or the converter's `YYYY-MM-DD HH:MM:SS` (UTC)
/// into unix seconds.
pub fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.timestamp())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc().timestamp())
        })
}

/// Stable identity for an entry: its own id, else its link, else a hash of
/// title and publication time so re-fetches map to the same row.
pub fn generate_guid(
    existing: Option<&str>,
    link: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    for candidate in [existing, link].into_iter().flatten() {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}",
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
