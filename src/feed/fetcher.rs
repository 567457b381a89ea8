use std::future::Future;

use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::parser::{FeedDocument, FetchedFeed, ParseError};
use crate::config::ProxyConfig;
use crate::race::{first_success, Strategy};
use crate::util::{validate_url, UrlValidationError};

pub(crate) const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed through the proxies.
///
/// Every variant except [`FetchError::AllProxiesFailed`] and
/// [`FetchError::InvalidUrl`] describes a single strategy and is only seen
/// in debug logs; callers get the aggregate.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Proxy answered with a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Proxy returned no document
    #[error("Empty response from proxy")]
    EmptyBody,
    /// Document could not be parsed as RSS, Atom or converter JSON
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// Proxy request URL could not be built from the configured base
    #[error("Bad proxy URL: {0}")]
    Proxy(#[from] url::ParseError),
    /// Feed URL refused before any request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// No strategy produced a feed
    #[error("Could not fetch this feed: all proxies failed")]
    AllProxiesFailed,
}

/// Source of parsed feeds.
///
/// Ingestion code is generic over this so it can run against canned feeds.
pub trait FetchFeed: Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedFeed, FetchError>> + Send;
}

/// Fetches feeds by racing the three configured proxies.
#[derive(Debug, Clone)]
pub struct ProxyFeedFetcher {
    client: reqwest::Client,
    proxies: ProxyConfig,
    max_items: usize,
}

/// JSON envelope returned by the `allorigins` style proxy.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    contents: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

impl ProxyFeedFetcher {
    pub fn new(client: reqwest::Client, proxies: ProxyConfig, max_items: usize) -> Self {
        Self {
            client,
            proxies,
            max_items,
        }
    }

    /// JSON feed-conversion proxy.
    async fn via_converter(&self, feed_url: &str) -> Result<FetchedFeed, FetchError> {
        let endpoint = Url::parse_with_params(
            &format!("{}/v1/api.json", self.proxies.rss2json_url.trim_end_matches('/')),
            &[("rss_url", feed_url)],
        )?;
        let (_, body) = get_body(&self.client, endpoint).await?;
        Ok(FeedDocument::from_json(&body)?.into_feed(feed_url, self.max_items))
    }

    /// JSON envelope proxy; the document sits in `contents` or `body`.
    async fn via_envelope(&self, feed_url: &str) -> Result<FetchedFeed, FetchError> {
        let endpoint = Url::parse_with_params(
            &format!("{}/get", self.proxies.allorigins_url.trim_end_matches('/')),
            &[("url", feed_url)],
        )?;
        let (content_type, body) = get_body(&self.client, endpoint).await?;

        let xml = if content_type.is_some_and(|ct| ct.contains("json")) {
            let envelope: Envelope = serde_json::from_slice(&body).map_err(ParseError::from)?;
            envelope
                .contents
                .filter(|c| !c.trim().is_empty())
                .or(envelope.body)
                .unwrap_or_default()
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };
        self.parse_xml(feed_url, &xml)
    }

    /// Raw relay proxy returning the upstream bytes.
    async fn via_relay(&self, feed_url: &str) -> Result<FetchedFeed, FetchError> {
        let encoded: String = url::form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
        let endpoint = Url::parse(&format!(
            "{}/?{}",
            self.proxies.corsproxy_url.trim_end_matches('/'),
            encoded
        ))?;
        let (_, body) = get_body(&self.client, endpoint).await?;
        self.parse_xml(feed_url, &String::from_utf8_lossy(&body))
    }

    fn parse_xml(&self, feed_url: &str, xml: &str) -> Result<FetchedFeed, FetchError> {
        if xml.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(FeedDocument::from_xml(xml)?.into_feed(feed_url, self.max_items))
    }
}

impl FetchFeed for ProxyFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let feed_url = validate_url(url)?;
        let feed_url = feed_url.as_str();

        let strategies: Vec<Strategy<'_, FetchedFeed, FetchError>> = vec![
            ("rss2json", self.via_converter(feed_url).boxed()),
            ("allorigins", self.via_envelope(feed_url).boxed()),
            ("corsproxy", self.via_relay(feed_url).boxed()),
        ];

        let feed = first_success(strategies, self.proxies.feed_timeout())
            .await
            .map_err(|e| {
                tracing::debug!(feed = %feed_url, error = %e, "Feed fetch exhausted all proxies");
                FetchError::AllProxiesFailed
            })?;

        tracing::debug!(feed = %feed_url, items = feed.items.len(), "Fetched feed");
        Ok(feed)
    }
}

/// GETs `url` and returns its content type and size-limited body.
async fn get_body(
    client: &reqwest::Client,
    url: Url,
) -> Result<(Option<String>, Vec<u8>), FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);

    let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::EmptyBody);
    }
    Ok((content_type, body))
}

pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
