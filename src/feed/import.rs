use thiserror::Error;
use tokio::sync::mpsc;

use super::fetcher::FetchFeed;
use super::health::record_fetch_result;
use super::opml::OpmlEntry;
use super::refresh::articles_from_items;
use crate::config::IngestConfig;
use crate::storage::{Database, NewFeed, UpsertOutcome};
use crate::util::run_bounded;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Feeds fetched at once
    pub concurrency: usize,
    /// Items per feed written to the store
    pub articles_per_feed: usize,
    /// Replaces every entry's own category when set
    pub category: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl ImportOptions {
    pub fn from_config(ingest: &IngestConfig) -> Self {
        Self {
            concurrency: ingest.import_concurrency,
            articles_per_feed: ingest.articles_per_feed,
            category: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Feeds subscribed, including those whose first fetch failed
    pub succeeded: usize,
    /// Entries skipped because the URL was already followed or repeated
    pub duplicates: usize,
    /// Subscribed feeds whose first fetch failed
    pub fetch_failures: usize,
    pub articles: UpsertOutcome,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read existing feeds: {0:#}")]
    LoadExisting(anyhow::Error),

    #[error("Failed to save feeds: {0:#}")]
    SaveFeeds(anyhow::Error),
}

/// Subscribes `owner` to every new entry and pre-populates their articles.
///
/// Entries whose URL is already followed, or that repeat an earlier entry,
/// count as duplicates. All new feeds are saved in one transaction before
/// any network work; if that fails nothing is fetched. Each feed is then
/// fetched by a pool of `options.concurrency` workers and its health
/// recorded. A failed fetch leaves the subscription in place. Finally the
/// collected items are upserted in one call, and a failure there is logged
/// rather than returned.
///
/// `(completed, total)` is sent on `progress` after every fetch.
pub async fn import_feeds<F: FetchFeed>(
    db: &Database,
    fetcher: &F,
    owner: &str,
    entries: Vec<OpmlEntry>,
    options: &ImportOptions,
    progress: Option<&mpsc::Sender<(usize, usize)>>,
) -> Result<ImportReport, ImportError> {
    let mut seen = db
        .get_feed_urls(owner)
        .await
        .map_err(ImportError::LoadExisting)?;

    let mut fresh = Vec::with_capacity(entries.len());
    let mut duplicates = 0;
    for mut entry in entries {
        if !seen.insert(entry.xml_url.clone()) {
            duplicates += 1;
            continue;
        }
        if let Some(category) = &options.category {
            entry.category = category.clone();
        }
        fresh.push(entry);
    }

    if fresh.is_empty() {
        tracing::info!(duplicates, "Import found no new feeds");
        return Ok(ImportReport {
            duplicates,
            ..ImportReport::default()
        });
    }

    let rows: Vec<NewFeed> = fresh
        .iter()
        .map(|e| NewFeed::rss(&e.xml_url, &e.title, &e.category))
        .collect();
    let ids = db
        .insert_feeds_bulk(owner, &rows)
        .await
        .map_err(ImportError::SaveFeeds)?;

    let jobs: Vec<(i64, OpmlEntry)> = fresh
        .into_iter()
        .filter_map(|entry| ids.get(&entry.xml_url).map(|id| (*id, entry)))
        .collect();
    let succeeded = jobs.len();
    let per_feed = options.articles_per_feed;

    let fetched = run_bounded(
        jobs,
        options.concurrency,
        |(feed_id, entry)| async move {
            match fetcher.fetch(&entry.xml_url).await {
                Ok(feed) => {
                    record_fetch_result(db, feed_id, &Ok(feed.items.len())).await;
                    Some(articles_from_items(owner, feed_id, &entry.category, &feed.items, per_feed))
                }
                Err(e) => {
                    tracing::debug!(feed = %entry.xml_url, error = %e, "Initial fetch failed");
                    record_fetch_result(db, feed_id, &Err(e)).await;
                    None
                }
            }
        },
        progress,
    )
    .await;

    let fetch_failures = fetched.iter().filter(|r| r.is_none()).count();
    let articles: Vec<_> = fetched.into_iter().flatten().flatten().collect();

    let articles = match db.upsert_articles(&articles).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, count = articles.len(), "Failed to store imported articles");
            UpsertOutcome::default()
        }
    };

    tracing::info!(
        succeeded,
        duplicates,
        fetch_failures,
        inserted = articles.inserted,
        "Import complete"
    );

    Ok(ImportReport {
        succeeded,
        duplicates,
        fetch_failures,
        articles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::FetchError;
    use crate::feed::parser::{FetchedFeed, RawFeedItem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Feeds whose URL contains "down" fail; others return two items.
    #[derive(Default)]
    struct StubFetcher {
        calls: AtomicUsize,
    }

    impl FetchFeed for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("down") {
                return Err(FetchError::AllProxiesFailed);
            }
            let items = (0..2)
                .map(|i| RawFeedItem {
                    title: format!("{url} {i}"),
                    link: Some(format!("{url}/{i}")),
                    teaser: "teaser".into(),
                    full_text: None,
                    published: Some(1_704_067_200 + i),
                    author: None,
                    guid: format!("{url}/{i}"),
                })
                .collect();
            Ok(FetchedFeed {
                title: url.to_string(),
                description: String::new(),
                items,
            })
        }
    }

    fn entry(url: &str, category: &str) -> OpmlEntry {
        OpmlEntry {
            title: url.to_string(),
            xml_url: url.to_string(),
            category: category.to_string(),
        }
    }

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_import_counts() {
        let db = test_db().await;
        db.insert_feed("alice", &NewFeed::rss("https://old.example.com/rss", "Old", "Tech"))
            .await
            .unwrap();
        let fetcher = StubFetcher::default();

        let entries = vec![
            entry("https://a.example.com/rss", "Tech"),
            entry("https://old.example.com/rss", "Tech"),
            entry("https://down.example.com/rss", "News"),
            entry("https://a.example.com/rss", "Other"),
        ];
        let report = import_feeds(&db, &fetcher, "alice", entries, &ImportOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(
            report,
            ImportReport {
                succeeded: 2,
                duplicates: 2,
                fetch_failures: 1,
                articles: UpsertOutcome {
                    inserted: 2,
                    updated: 0
                },
            }
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let feeds = db.get_feeds("alice").await.unwrap();
        assert_eq!(feeds.len(), 3);
        let down = feeds.iter().find(|f| f.url.contains("down")).unwrap();
        assert!(down.last_error.is_some());
        let a = feeds.iter().find(|f| f.url.contains("//a.")).unwrap();
        assert_eq!(a.category, "Tech");
        assert_eq!(a.article_count, 2);
    }

    #[tokio::test]
    async fn test_import_progress_reaches_total() {
        let db = test_db().await;
        let fetcher = StubFetcher::default();
        let entries: Vec<_> = (0..20)
            .map(|i| entry(&format!("https://f{i}.example.com/rss"), "Tech"))
            .collect();
        let (tx, mut rx) = mpsc::channel(64);

        let report = import_feeds(&db, &fetcher, "alice", entries, &ImportOptions::default(), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p);
        }
        assert_eq!(seen.len(), 20);
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last(), Some(&(20, 20)));
        assert_eq!(report.articles.inserted, 40);
    }

    #[tokio::test]
    async fn test_category_override() {
        let db = test_db().await;
        let options = ImportOptions {
            category: Some("Imported".into()),
            ..ImportOptions::default()
        };
        import_feeds(
            &db,
            &StubFetcher::default(),
            "alice",
            vec![entry("https://a.example.com/rss", "Tech")],
            &options,
            None,
        )
        .await
        .unwrap();

        let feeds = db.get_feeds("alice").await.unwrap();
        assert_eq!(feeds[0].category, "Imported");
    }

    #[tokio::test]
    async fn test_all_duplicates_skip_network() {
        let db = test_db().await;
        db.insert_feed("alice", &NewFeed::rss("https://a.example.com/rss", "A", "Tech"))
            .await
            .unwrap();
        let fetcher = StubFetcher::default();

        let report = import_feeds(
            &db,
            &fetcher,
            "alice",
            vec![entry("https://a.example.com/rss", "Tech")],
            &ImportOptions::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.duplicates, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_save_failure_aborts_before_fetching() {
        let db = test_db().await;
        sqlx::query(
            "CREATE TRIGGER reject_feeds BEFORE INSERT ON feeds \
             BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();
        let fetcher = StubFetcher::default();

        let err = import_feeds(
            &db,
            &fetcher,
            "alice",
            vec![entry("https://a.example.com/rss", "Tech")],
            &ImportOptions::default(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ImportError::SaveFeeds(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_article_store_failure_is_not_fatal() {
        let db = test_db().await;
        sqlx::query(
            "CREATE TRIGGER reject_articles BEFORE INSERT ON articles \
             BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let report = import_feeds(
            &db,
            &StubFetcher::default(),
            "alice",
            vec![entry("https://a.example.com/rss", "Tech")],
            &ImportOptions::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.articles, UpsertOutcome::default());
        assert_eq!(db.get_feeds("alice").await.unwrap().len(), 1);
    }
}
