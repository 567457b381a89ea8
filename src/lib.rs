//! Per-user feed aggregation.
//!
//! Feeds are fetched by racing several third-party proxies ([`race`]),
//! normalized into one item shape ([`feed`]), deduplicated into a per-user
//! SQLite store ([`storage`]) and, on read, upgraded to full article text
//! through a tiered resolver ([`content`]).

pub mod config;
pub mod content;
pub mod feed;
pub mod race;
pub mod storage;
pub mod util;
