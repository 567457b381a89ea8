use std::fmt;

use super::extract::MAX_EXTRACT_CHARS;
use super::proxies::ContentProxies;
use crate::config::{Config, FullTextConfig};
use crate::util::{char_len, clean_text, validate_url};

/// Where resolved article text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullTextSource {
    /// Full content shipped in the feed
    Rss,
    /// Fetched from the article page through a proxy
    Proxy,
    /// Short feed content used because every proxy failed
    RssPartial,
}

impl FullTextSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FullTextSource::Rss => "rss",
            FullTextSource::Proxy => "proxy",
            FullTextSource::RssPartial => "rss-partial",
        }
    }
}

impl fmt::Display for FullTextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullText {
    pub content: String,
    pub source: FullTextSource,
}

/// Resolves readable article text, cheapest source first.
#[derive(Debug, Clone)]
pub struct FullTextResolver {
    proxies: ContentProxies,
    thresholds: FullTextConfig,
}

impl FullTextResolver {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            proxies: ContentProxies::new(client, config.proxies.clone(), config.full_text.clone()),
            thresholds: config.full_text.clone(),
        }
    }

    /// Returns the best text available for an article.
    ///
    /// 1. Stored content of at least `min_stored_chars` is used as is,
    ///    without touching the network.
    /// 2. Otherwise the proxies race for the live page. Skipped when `link`
    ///    is missing or not a public http(s) URL.
    /// 3. Failing that, stored content of at least `partial_min_chars`.
    ///
    /// `None` means nothing usable was found; this never errors.
    pub async fn resolve(&self, link: Option<&str>, stored: Option<&str>) -> Option<FullText> {
        let stored = stored.map(str::trim).filter(|s| !s.is_empty());
        let stored_len = stored.map_or(0, char_len);

        if let Some(text) = stored.filter(|_| stored_len >= self.thresholds.min_stored_chars) {
            return Some(FullText {
                content: clean_text(text, MAX_EXTRACT_CHARS),
                source: FullTextSource::Rss,
            });
        }

        if let Some(link) = link {
            match validate_url(link) {
                Ok(url) => {
                    if let Some(content) = self.proxies.fetch_text(&url).await {
                        return Some(FullText {
                            content,
                            source: FullTextSource::Proxy,
                        });
                    }
                }
                Err(e) => tracing::debug!(link, error = %e, "Skipping proxies for article link"),
            }
        }

        stored
            .filter(|_| stored_len >= self.thresholds.partial_min_chars)
            .map(|text| FullText {
                content: clean_text(text, MAX_EXTRACT_CHARS),
                source: FullTextSource::RssPartial,
            })
    }
}

/// One-shot form of [`FullTextResolver::resolve`].
pub async fn resolve_full_text(
    client: &reqwest::Client,
    config: &Config,
    link: Option<&str>,
    stored: Option<&str>,
) -> Option<FullText> {
    FullTextResolver::new(client.clone(), config)
        .resolve(link, stored)
        .await
}
