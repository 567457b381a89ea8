//! End-to-end ingestion through mocked proxies: OPML import, refresh and
//! full-text resolution on read.

use myfeed::config::{Config, ProxyConfig};
use myfeed::content::{FullTextResolver, FullTextSource};
use myfeed::feed::{self, ImportOptions, ProxyFeedFetcher};
use myfeed::storage::{ArticleQuery, Database, ReadFilter};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OPML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Export</title></head>
  <body>
    <outline text="Tech">
      <outline type="rss" text="Alpha" xmlUrl="https://alpha.example.com/rss"/>
      <outline type="rss" text="Beta" xmlUrl="https://beta.example.com/atom"/>
    </outline>
    <outline type="rss" text="Gone" xmlUrl="https://gone.example.com/rss"/>
    <outline type="rss" text="Alpha again" xmlUrl="https://alpha.example.com/rss"/>
  </body>
</opml>"#;

const BETA_ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Beta</title>
  <entry>
    <id>urn:beta:1</id>
    <title>Beta one</title>
    <link rel="alternate" href="https://beta.example.com/1"/>
    <updated>2024-01-02T10:00:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;

struct Proxies {
    converter: MockServer,
    envelope: MockServer,
    relay: MockServer,
}

impl Proxies {
    async fn start() -> Self {
        Self {
            converter: MockServer::start().await,
            envelope: MockServer::start().await,
            relay: MockServer::start().await,
        }
    }

    fn config(&self) -> Config {
        Config {
            proxies: ProxyConfig {
                rss2json_url: self.converter.uri(),
                allorigins_url: self.envelope.uri(),
                corsproxy_url: self.relay.uri(),
                microlink_url: self.converter.uri(),
                feed_timeout_secs: 3,
                content_timeout_secs: 3,
                ..ProxyConfig::default()
            },
            ..Config::default()
        }
    }

    fn fetcher(&self) -> ProxyFeedFetcher {
        ProxyFeedFetcher::new(reqwest::Client::new(), self.config().proxies, 20)
    }
}

fn converter_items(prefix: &str, n: usize) -> serde_json::Value {
    let items: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "title": format!("{prefix} {i}"),
                "link": format!("https://{prefix}.example.com/{i}"),
                "guid": format!("{prefix}-{i}"),
                "pubDate": format!("2024-01-{:02} 08:00:00", i + 1),
                "description": "<p>Teaser text</p>",
                "content": "<p>Body</p>"
            })
        })
        .collect();
    serde_json::json!({"status": "ok", "feed": {"title": prefix}, "items": items})
}

async fn mount_feeds(proxies: &Proxies, alpha_items: usize) {
    Mock::given(method("GET"))
        .and(path("/v1/api.json"))
        .and(query_param("rss_url", "https://alpha.example.com/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_json(converter_items("alpha", alpha_items)))
        .mount(&proxies.converter)
        .await;
    Mock::given(method("GET"))
        .and(path("/get"))
        .and(query_param("url", "https://beta.example.com/atom"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "contents": BETA_ATOM
        })))
        .mount(&proxies.envelope)
        .await;
}

#[tokio::test]
async fn test_import_then_refresh() {
    let proxies = Proxies::start().await;
    mount_feeds(&proxies, 12).await;
    let db = Database::open(":memory:").await.unwrap();
    let fetcher = proxies.fetcher();

    let entries = feed::parse_opml(OPML).unwrap();
    assert_eq!(entries.len(), 4);

    let (tx, mut rx) = mpsc::channel(16);
    let report = feed::import_feeds(&db, &fetcher, "alice", entries, &ImportOptions::default(), Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.fetch_failures, 1);
    // Ten of alpha's twelve items plus beta's one
    assert_eq!(report.articles.inserted, 11);

    let mut last = (0, 0);
    while let Some(p) = rx.recv().await {
        assert!(p.0 >= last.0);
        last = p;
    }
    assert_eq!(last, (3, 3));

    let feeds = db.get_feeds("alice").await.unwrap();
    let gone = feeds.iter().find(|f| f.title == "Gone").unwrap();
    assert_eq!(
        gone.last_error.as_deref(),
        Some("Could not fetch this feed: all proxies failed")
    );
    let beta = feeds.iter().find(|f| f.title == "Beta").unwrap();
    assert_eq!(beta.category, "Tech");
    assert_eq!(gone.category, "General");

    // Refresh: nothing new, but every stored item is touched again
    let refreshed = feed::refresh_all(&db, &fetcher, "alice", 10, 10, None).await.unwrap();
    assert_eq!(refreshed.feeds.len(), 3);
    assert_eq!(refreshed.failed(), 1);
    assert_eq!(refreshed.articles.inserted, 0);
    assert_eq!(refreshed.articles.updated, 11);
    assert_eq!(db.count_articles("alice").await.unwrap(), 11);

    let all = db
        .get_articles(
            "alice",
            &ArticleQuery {
                read_filter: ReadFilter::All,
                limit: 50,
                ..ArticleQuery::default()
            },
        )
        .await
        .unwrap();
    let beta_article = all.articles.iter().find(|a| a.guid == "urn:beta:1").unwrap();
    assert_eq!(beta_article.link.as_deref(), Some("https://beta.example.com/1"));
    assert_eq!(beta_article.description, "Short summary");
}

#[tokio::test]
async fn test_export_after_import() {
    let proxies = Proxies::start().await;
    mount_feeds(&proxies, 1).await;
    let db = Database::open(":memory:").await.unwrap();

    let entries = feed::parse_opml(OPML).unwrap();
    feed::import_feeds(&db, &proxies.fetcher(), "alice", entries, &ImportOptions::default(), None)
        .await
        .unwrap();

    let feeds = db.get_feeds("alice").await.unwrap();
    let opml = feed::export_opml(&feeds).unwrap();
    let reparsed = feed::parse_opml(&opml).unwrap();
    let mut urls: Vec<_> = reparsed.iter().map(|e| e.xml_url.as_str()).collect();
    urls.sort_unstable();
    assert_eq!(
        urls,
        vec![
            "https://alpha.example.com/rss",
            "https://beta.example.com/atom",
            "https://gone.example.com/rss"
        ]
    );

    let csv = feed::export_csv(&feeds);
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.contains(r#""Alpha","https://alpha.example.com/rss","Tech","#));
}

#[tokio::test]
async fn test_read_resolves_and_caches_full_text() {
    let proxies = Proxies::start().await;
    mount_feeds(&proxies, 1).await;
    let page_text = (0..80).map(|i| format!("sentence{i}")).collect::<Vec<_>>().join(" ");
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("url", "https://alpha.example.com/0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {"content": page_text}
        })))
        .mount(&proxies.converter)
        .await;

    let db = Database::open(":memory:").await.unwrap();
    let fetcher = proxies.fetcher();
    let added = feed::add_feed(
        &db,
        &fetcher,
        "alice",
        &feed::Subscription::rss("https://alpha.example.com/rss"),
        10,
    )
    .await
    .unwrap();
    assert_eq!(added.feed.title, "alpha");

    let article = db
        .get_articles("alice", &ArticleQuery::default())
        .await
        .unwrap()
        .articles
        .remove(0);
    assert_eq!(article.full_content.as_deref(), Some("Body"));

    let resolver = FullTextResolver::new(reqwest::Client::new(), &proxies.config());
    let text = resolver
        .resolve(article.link.as_deref(), article.full_content.as_deref())
        .await
        .unwrap();
    assert_eq!(text.source, FullTextSource::Proxy);
    assert_eq!(text.content, page_text);

    // Cached text is long enough to be served without the network next time
    db.set_full_content("alice", article.id, &text.content).await.unwrap();
    let cached = db.get_article("alice", article.id).await.unwrap().unwrap();
    let again = resolver
        .resolve(cached.link.as_deref(), cached.full_content.as_deref())
        .await
        .unwrap();
    assert_eq!(again.source, FullTextSource::Rss);
}
