//! Configuration file parser for ~/.config/myfeed/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings since they are
//! usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `proxies.microlink_api_key`.
pub const MICROLINK_API_KEY_ENV: &str = "MICROLINK_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// Every section and key is optional; missing values fall back to
/// `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxies: ProxyConfig,
    pub ingest: IngestConfig,
    pub full_text: FullTextConfig,
}

/// Base URLs and timeouts of the third-party proxies.
///
/// Base URLs carry no trailing path; request paths are appended per proxy.
/// The custom Debug impl masks `microlink_api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// JSON feed-conversion proxy (`/v1/api.json?rss_url=`).
    pub rss2json_url: String,
    /// JSON envelope proxy (`/get?url=`).
    pub allorigins_url: String,
    /// Raw relay (`/?<encoded url>`).
    pub corsproxy_url: String,
    /// Page metadata API used for full text.
    pub microlink_url: String,
    /// Optional microlink key. The `MICROLINK_API_KEY` env var takes precedence.
    pub microlink_api_key: Option<String>,
    /// Per-strategy timeout when fetching feeds.
    pub feed_timeout_secs: u64,
    /// Per-strategy timeout when resolving article text.
    pub content_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rss2json_url: "https://api.rss2json.com".to_string(),
            allorigins_url: "https://api.allorigins.win".to_string(),
            corsproxy_url: "https://corsproxy.io".to_string(),
            microlink_url: "https://api.microlink.io".to_string(),
            microlink_api_key: None,
            feed_timeout_secs: 8,
            content_timeout_secs: 5,
        }
    }
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("rss2json_url", &self.rss2json_url)
            .field("allorigins_url", &self.allorigins_url)
            .field("corsproxy_url", &self.corsproxy_url)
            .field("microlink_url", &self.microlink_url)
            .field(
                "microlink_api_key",
                &self.microlink_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("feed_timeout_secs", &self.feed_timeout_secs)
            .field("content_timeout_secs", &self.content_timeout_secs)
            .finish()
    }
}

impl ProxyConfig {
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs)
    }

    /// Resolves the microlink key: env var first, then the config file.
    /// Blank values count as unset.
    pub fn microlink_key(&self) -> Option<SecretString> {
        std::env::var(MICROLINK_API_KEY_ENV)
            .ok()
            .or_else(|| self.microlink_api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
    }
}

/// Limits applied while ingesting feeds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Items kept from each fetched document.
    pub max_items: usize,
    /// Items per feed written to the store on import/refresh.
    pub articles_per_feed: usize,
    /// Worker count for bulk imports.
    pub import_concurrency: usize,
    /// In-flight fetches during refresh.
    pub refresh_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_items: 20,
            articles_per_feed: 10,
            import_concurrency: 8,
            refresh_concurrency: 10,
        }
    }
}

/// Length thresholds of the full-text tiers, in characters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FullTextConfig {
    /// Stored content at least this long is served without network access.
    pub min_stored_chars: usize,
    /// Stored content at least this long is the last-resort fallback.
    pub partial_min_chars: usize,
    /// Minimum microlink content length.
    pub microlink_min_chars: usize,
    /// Minimum extracted page text length.
    pub extract_min_chars: usize,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            min_stored_chars: 300,
            partial_min_chars: 40,
            microlink_min_chars: 100,
            extract_min_chars: 150,
        }
    }
}

const KNOWN_KEYS: &[(&str, &[&str])] = &[
    (
        "proxies",
        &[
            "rss2json_url",
            "allorigins_url",
            "corsproxy_url",
            "microlink_url",
            "microlink_api_key",
            "feed_timeout_secs",
            "content_timeout_secs",
        ],
    ),
    (
        "ingest",
        &[
            "max_items",
            "articles_per_feed",
            "import_concurrency",
            "refresh_concurrency",
        ],
    ),
    (
        "full_text",
        &[
            "min_stored_chars",
            "partial_min_chars",
            "microlink_min_chars",
            "extract_min_chars",
        ],
    ),
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in unknown_keys(&raw) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            feed_timeout_secs = config.proxies.feed_timeout_secs,
            import_concurrency = config.ingest.import_concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }
}

/// Dotted paths of keys that no config field reads.
fn unknown_keys(raw: &toml::Table) -> Vec<String> {
    let mut unknown = Vec::new();
    for (section, value) in raw {
        let Some((_, fields)) = KNOWN_KEYS.iter().find(|(name, _)| name == section) else {
            unknown.push(section.clone());
            continue;
        };
        if let Some(table) = value.as_table() {
            unknown.extend(
                table
                    .keys()
                    .filter(|k| !fields.contains(&k.as_str()))
                    .map(|k| format!("{section}.{k}")),
            );
        }
    }
    unknown
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("myfeed_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.proxies.rss2json_url, "https://api.rss2json.com");
        assert_eq!(config.proxies.feed_timeout(), Duration::from_secs(8));
        assert_eq!(config.proxies.content_timeout(), Duration::from_secs(5));
        assert_eq!(config.ingest.max_items, 20);
        assert_eq!(config.ingest.articles_per_feed, 10);
        assert_eq!(config.ingest.import_concurrency, 8);
        assert_eq!(config.full_text.min_stored_chars, 300);
        assert_eq!(config.full_text.partial_min_chars, 40);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/myfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.ingest.max_items, 20);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ingest.import_concurrency, 8);
        cleanup(&path);
    }

    #[test]
    fn test_partial_section_uses_defaults_for_missing() {
        let path = write_config("partial", "[ingest]\nimport_concurrency = 4\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ingest.import_concurrency, 4);
        assert_eq!(config.ingest.max_items, 20);
        assert_eq!(config.proxies.corsproxy_url, "https://corsproxy.io");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
[proxies]
rss2json_url = "http://127.0.0.1:9001"
allorigins_url = "http://127.0.0.1:9002"
corsproxy_url = "http://127.0.0.1:9003"
microlink_url = "http://127.0.0.1:9004"
feed_timeout_secs = 3
content_timeout_secs = 2

[ingest]
max_items = 50
articles_per_feed = 5

[full_text]
min_stored_chars = 500
partial_min_chars = 51
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.proxies.allorigins_url, "http://127.0.0.1:9002");
        assert_eq!(config.proxies.feed_timeout(), Duration::from_secs(3));
        assert_eq!(config.ingest.max_items, 50);
        assert_eq!(config.ingest.articles_per_feed, 5);
        assert_eq!(config.full_text.min_stored_chars, 500);
        assert_eq!(config.full_text.partial_min_chars, 51);
        assert_eq!(config.full_text.extract_min_chars, 150);
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "[ingest]\nmax_items = \"many\"\n");
        assert!(Config::load(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_detected_but_accepted() {
        let content = r#"
theme = "dark"

[ingest]
max_items = 5
max_itmes = 7

[proxies]
rss2json_url = "https://example.com"
"#;
        let raw: toml::Table = content.parse().unwrap();
        let mut unknown = unknown_keys(&raw);
        unknown.sort();
        assert_eq!(unknown, vec!["ingest.max_itmes", "theme"]);

        let path = write_config("unknown", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ingest.max_items, 5);
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let mut config = Config::default();
        config.proxies.microlink_api_key = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_file_key_used_and_blank_ignored() {
        // A key exported in the environment would shadow the file value
        if std::env::var(MICROLINK_API_KEY_ENV).is_ok() {
            return;
        }
        let mut proxies = ProxyConfig::default();
        assert!(proxies.microlink_key().is_none());

        proxies.microlink_api_key = Some("   ".to_string());
        assert!(proxies.microlink_key().is_none());

        proxies.microlink_api_key = Some("file-key".to_string());
        let key = proxies.microlink_key().unwrap();
        assert_eq!(key.expose_secret(), "file-key");
    }
}
