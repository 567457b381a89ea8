use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

use super::fetcher::{FetchError, FetchFeed};
use super::health::record_fetch_result;
use super::parser::RawFeedItem;
use crate::storage::{
    Database, Feed, FeedType, NewArticle, NewFeed, UpsertOutcome, DEFAULT_CATEGORY,
    NEWSLETTER_CATEGORY,
};

/// Converts fetched items into store rows for one feed.
///
/// At most `limit` items are kept, in feed order.
pub fn articles_from_items(
    owner: &str,
    feed_id: i64,
    category: &str,
    items: &[RawFeedItem],
    limit: usize,
) -> Vec<NewArticle> {
    items
        .iter()
        .take(limit)
        .map(|item| NewArticle {
            owner: owner.to_string(),
            feed_id,
            guid: item.guid.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.teaser.clone(),
            full_content: item.full_text.clone(),
            author: item.author.clone(),
            pub_date: item.published,
            category: category.to_string(),
        })
        .collect()
}

// ============================================================================
// Manual subscribe
// ============================================================================

/// A feed the user asked to follow.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub url: String,
    /// Overrides the title found in the feed
    pub title: Option<String>,
    /// Blank means [`DEFAULT_CATEGORY`], or [`NEWSLETTER_CATEGORY`] for newsletters
    pub category: String,
    pub feed_type: FeedType,
    pub folder_id: Option<i64>,
}

impl Subscription {
    pub fn rss(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            category: String::new(),
            feed_type: FeedType::Rss,
            folder_id: None,
        }
    }

    fn resolved_category(&self) -> &str {
        match self.category.trim() {
            "" if self.feed_type == FeedType::Newsletter => NEWSLETTER_CATEGORY,
            "" => DEFAULT_CATEGORY,
            category => category,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to save feed: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug)]
pub struct Subscribed {
    pub feed: Feed,
    pub articles: UpsertOutcome,
}

/// Subscribes to a feed after proving it can be fetched.
///
/// Nothing is stored when the fetch fails. The feed's first
/// `articles_per_feed` items are stored right away; a failure there is
/// logged and leaves the subscription in place.
pub async fn add_feed<F: FetchFeed>(
    db: &Database,
    fetcher: &F,
    owner: &str,
    subscription: &Subscription,
    articles_per_feed: usize,
) -> Result<Subscribed, SubscribeError> {
    let url = subscription.url.trim();
    let existing = db.get_feed_urls(owner).await.map_err(SubscribeError::Store)?;
    if existing.contains(url) {
        return Err(SubscribeError::AlreadySubscribed(url.to_string()));
    }

    let fetched = fetcher.fetch(url).await?;

    let title = subscription
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&fetched.title);
    let new_feed = NewFeed {
        url: url.to_string(),
        title: title.to_string(),
        category: subscription.resolved_category().to_string(),
        feed_type: subscription.feed_type,
        folder_id: subscription.folder_id,
    };
    let feed = db
        .insert_feed(owner, &new_feed)
        .await
        .map_err(SubscribeError::Store)?;

    let rows = articles_from_items(owner, feed.id, &feed.category, &fetched.items, articles_per_feed);
    let articles = match db.upsert_articles(&rows).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(feed = %feed.url, error = %e, "Failed to store initial articles");
            UpsertOutcome::default()
        }
    };
    record_fetch_result(db, feed.id, &Ok(fetched.items.len())).await;

    tracing::info!(feed = %feed.url, inserted = articles.inserted, "Subscribed to feed");
    Ok(Subscribed { feed, articles })
}

// ============================================================================
// Refresh
// ============================================================================

/// Outcome of refreshing one feed.
#[derive(Debug)]
pub struct FeedRefresh {
    pub feed_id: i64,
    pub title: String,
    /// Items fetched, or why the fetch failed
    pub result: Result<usize, FetchError>,
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    /// One entry per feed, in completion order
    pub feeds: Vec<FeedRefresh>,
    pub articles: UpsertOutcome,
}

impl RefreshReport {
    pub fn failed(&self) -> usize {
        self.feeds.iter().filter(|f| f.result.is_err()).count()
    }
}

/// Refreshes every feed of `owner`.
///
/// Fetches run with at most `concurrency` in flight and never abort each
/// other; each feed's health is recorded as it finishes. New items from all
/// feeds are written in a single upsert at the end, whose failure is the
/// only error returned.
pub async fn refresh_all<F: FetchFeed>(
    db: &Database,
    fetcher: &F,
    owner: &str,
    articles_per_feed: usize,
    concurrency: usize,
    progress: Option<&mpsc::Sender<(usize, usize)>>,
) -> anyhow::Result<RefreshReport> {
    let feeds = db.get_feeds(owner).await?;
    let total = feeds.len();
    if total == 0 {
        return Ok(RefreshReport::default());
    }

    let mut pending = stream::iter(feeds)
        .map(|feed| refresh_feed(db, fetcher, owner, feed, articles_per_feed))
        .buffer_unordered(concurrency.max(1));

    let mut report = RefreshReport::default();
    let mut rows = Vec::new();
    while let Some((outcome, articles)) = pending.next().await {
        report.feeds.push(outcome);
        rows.extend(articles);
        if let Some(tx) = progress {
            if let Err(e) = tx.send((report.feeds.len(), total)).await {
                tracing::warn!(error = %e, "Progress channel send failed (receiver dropped)");
            }
        }
    }

    report.articles = db.upsert_articles(&rows).await?;
    tracing::info!(
        feeds = total,
        failed = report.failed(),
        inserted = report.articles.inserted,
        updated = report.articles.updated,
        "Refresh complete"
    );
    Ok(report)
}

/// Refreshes a single feed of `owner`.
pub async fn refresh_one<F: FetchFeed>(
    db: &Database,
    fetcher: &F,
    owner: &str,
    feed_id: i64,
    articles_per_feed: usize,
) -> anyhow::Result<RefreshReport> {
    let Some(feed) = db.get_feed(owner, feed_id).await? else {
        anyhow::bail!("Feed {feed_id} not found");
    };

    let (outcome, rows) = refresh_feed(db, fetcher, owner, feed, articles_per_feed).await;
    let articles = db.upsert_articles(&rows).await?;
    Ok(RefreshReport {
        feeds: vec![outcome],
        articles,
    })
}

async fn refresh_feed<F: FetchFeed>(
    db: &Database,
    fetcher: &F,
    owner: &str,
    feed: Feed,
    articles_per_feed: usize,
) -> (FeedRefresh, Vec<NewArticle>) {
    let (result, rows) = match fetcher.fetch(&feed.url).await {
        Ok(fetched) => {
            let rows =
                articles_from_items(owner, feed.id, &feed.category, &fetched.items, articles_per_feed);
            (Ok(fetched.items.len()), rows)
        }
        Err(e) => {
            tracing::debug!(feed = %feed.url, error = %e, "Feed refresh failed");
            (Err(e), Vec::new())
        }
    };

    record_fetch_result(db, feed.id, &result).await;

    (
        FeedRefresh {
            feed_id: feed.id,
            title: feed.title,
            result,
        },
        rows,
    )
}
