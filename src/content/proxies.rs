//! Tier-2 article text strategies, each going through a different proxy.

use futures::{FutureExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::extract::{extract_readable_text, MAX_EXTRACT_CHARS};
use crate::config::{FullTextConfig, ProxyConfig};
use crate::race::{first_success, Strategy};
use crate::util::{char_len, clean_text};

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bad proxy URL: {0}")]
    Proxy(#[from] url::ParseError),
    #[error("Metadata API returned status {0:?}")]
    Status(String),
    #[error("Extracted text too short ({len} < {min} chars)")]
    TooShort { len: usize, min: usize },
}

#[derive(Deserialize)]
struct MetadataResponse {
    status: String,
    #[serde(default)]
    data: MetadataData,
}

#[derive(Default, Deserialize)]
struct MetadataData {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    contents: Option<String>,
}

/// Fetches article pages through the configured proxies.
#[derive(Debug, Clone)]
pub struct ContentProxies {
    client: reqwest::Client,
    proxies: ProxyConfig,
    thresholds: FullTextConfig,
}

impl ContentProxies {
    pub fn new(client: reqwest::Client, proxies: ProxyConfig, thresholds: FullTextConfig) -> Self {
        Self {
            client,
            proxies,
            thresholds,
        }
    }

    /// Races all strategies for `link`; `None` when every one fails or
    /// times out.
    pub async fn fetch_text(&self, link: &Url) -> Option<String> {
        let link = link.as_str();
        let strategies: Vec<Strategy<'_, String, ContentError>> = vec![
            ("microlink", self.via_metadata(link).boxed()),
            ("allorigins", self.via_envelope(link).boxed()),
            ("corsproxy", self.via_relay(link).boxed()),
        ];

        match first_success(strategies, self.proxies.content_timeout()).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!(link, error = %e, "No proxy produced article text");
                None
            }
        }
    }

    /// Metadata API returning page content directly.
    async fn via_metadata(&self, link: &str) -> Result<String, ContentError> {
        let base = self.proxies.microlink_url.trim_end_matches('/');
        let endpoint = Url::parse_with_params(
            &format!("{base}/"),
            &[
                ("url", link),
                ("meta", "false"),
                ("video", "false"),
                ("audio", "false"),
                ("screenshot", "false"),
            ],
        )?;

        let mut request = self.client.get(endpoint);
        // Only sent over TLS so the key never travels in clear text
        if let Some(key) = self.proxies.microlink_key() {
            if base.starts_with("https://") {
                request = request.header("x-api-key", key.expose_secret());
            } else {
                tracing::debug!("Skipping microlink API key for non-HTTPS base URL");
            }
        }

        let body = get_text(request).await?;
        let response: MetadataResponse = serde_json::from_str(&body)?;
        if response.status != "success" {
            return Err(ContentError::Status(response.status));
        }

        let content = response
            .data
            .content
            .filter(|c| !c.is_empty())
            .or(response.data.description)
            .unwrap_or_default();
        let min = self.thresholds.microlink_min_chars;
        let len = char_len(&content);
        if len < min {
            return Err(ContentError::TooShort { len, min });
        }
        Ok(clean_text(&content, MAX_EXTRACT_CHARS))
    }

    /// JSON envelope proxy wrapping the page HTML in `contents`.
    async fn via_envelope(&self, link: &str) -> Result<String, ContentError> {
        let endpoint = Url::parse_with_params(
            &format!("{}/get", self.proxies.allorigins_url.trim_end_matches('/')),
            &[("url", link)],
        )?;
        let body = get_text(self.client.get(endpoint)).await?;
        let envelope: Envelope = serde_json::from_str(&body)?;
        self.extract(&envelope.contents.unwrap_or_default())
    }

    /// Raw relay returning the page HTML.
    async fn via_relay(&self, link: &str) -> Result<String, ContentError> {
        let encoded: String = url::form_urlencoded::byte_serialize(link.as_bytes()).collect();
        let endpoint = Url::parse(&format!(
            "{}/?{}",
            self.proxies.corsproxy_url.trim_end_matches('/'),
            encoded
        ))?;
        let html = get_text(self.client.get(endpoint)).await?;
        self.extract(&html)
    }

    fn extract(&self, html: &str) -> Result<String, ContentError> {
        let min = self.thresholds.extract_min_chars;
        let text = extract_readable_text(html).unwrap_or_default();
        let len = char_len(&text);
        if len < min {
            return Err(ContentError::TooShort { len, min });
        }
        Ok(text)
    }
}

async fn get_text(request: reqwest::RequestBuilder) -> Result<String, ContentError> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ContentError::HttpStatus(response.status().as_u16()));
    }
    read_limited_text(response, MAX_CONTENT_SIZE).await
}

/// Reads the body as lossy UTF-8, failing once it grows past `limit` bytes.
async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
