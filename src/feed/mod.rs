//! Feed ingestion: fetching, parsing, subscribing, refreshing and
//! OPML/CSV exchange.
//!
//! - [`fetcher`] races the configured proxies for a feed document
//! - [`parser`] normalizes RSS, Atom and converter JSON into [`FetchedFeed`]
//! - [`refresh`] subscribes to single feeds and refreshes existing ones
//! - [`import`] bulk-subscribes from OPML with a bounded worker pool
//! - [`health`] stamps fetch outcomes on feed rows
//! - [`opml`] and [`export`] read and write subscription lists

mod export;
mod fetcher;
mod health;
mod import;
mod opml;
mod parser;
mod refresh;
mod xml;

pub use export::{export_csv, export_path, render, write_atomic, ExportFormat};
pub use fetcher::{FetchError, FetchFeed, ProxyFeedFetcher};
pub use health::record_fetch_result;
pub use import::{import_feeds, ImportError, ImportOptions, ImportReport};
pub use opml::{export_opml, parse_file, parse_opml, OpmlEntry, OpmlError};
pub use parser::{generate_guid, parse_date, FeedDocument, FetchedFeed, ParseError, RawFeedItem};
pub use refresh::{
    add_feed, articles_from_items, refresh_all, refresh_one, FeedRefresh, RefreshReport,
    Subscribed, SubscribeError, Subscription,
};
pub use xml::XmlError;
