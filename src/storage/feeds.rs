use anyhow::{bail, Result};
use sqlx::QueryBuilder;
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{Feed, FeedUpdate, NewFeed};
use crate::util::strip_control_chars;

const FEED_COLUMNS: &str = "id, owner, url, title, category, folder_id, feed_type, \
     last_fetched_at, last_error, article_count, created_at";

/// Strips control characters and surrounding whitespace from a display name.
fn clean_name(name: &str) -> String {
    strip_control_chars(name).trim().to_owned()
}

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Inserts a single feed and returns the stored row.
    ///
    /// Fails if the owner already subscribes to the URL.
    pub async fn insert_feed(&self, owner: &str, feed: &NewFeed) -> Result<Feed> {
        let title = clean_name(&feed.title);
        let title = if title.is_empty() { feed.url.clone() } else { title };
        let now = chrono::Utc::now().timestamp();

        let row: Feed = sqlx::query_as(&format!(
            "INSERT INTO feeds (owner, url, title, category, feed_type, folder_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        ))
        .bind(owner)
        .bind(&feed.url)
        .bind(&title)
        .bind(clean_name(&feed.category))
        .bind(feed.feed_type.as_str())
        .bind(feed.folder_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Inserts many feeds in one transaction, returning their ids keyed by URL.
    ///
    /// Either every row is written or none is.
    pub async fn insert_feeds_bulk(
        &self,
        owner: &str,
        feeds: &[NewFeed],
    ) -> Result<HashMap<String, i64>> {
        if feeds.is_empty() {
            return Ok(HashMap::new());
        }

        const BATCH_SIZE: usize = 100;
        let now = chrono::Utc::now().timestamp();
        let mut ids = HashMap::with_capacity(feeds.len());
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO feeds (owner, url, title, category, feed_type, folder_id, created_at) ",
            );

            builder.push_values(chunk, |mut b, feed| {
                let title = clean_name(&feed.title);
                b.push_bind(owner)
                    .push_bind(feed.url.clone())
                    .push_bind(if title.is_empty() { feed.url.clone() } else { title })
                    .push_bind(clean_name(&feed.category))
                    .push_bind(feed.feed_type.as_str())
                    .push_bind(feed.folder_id)
                    .push_bind(now);
            });
            builder.push(" RETURNING id, url");

            let rows: Vec<(i64, String)> = builder.build_query_as().fetch_all(&mut *tx).await?;
            ids.extend(rows.into_iter().map(|(id, url)| (url, id)));
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// All of the owner's feeds, newest subscription first.
    pub async fn get_feeds(&self, owner: &str) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE owner = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, owner: &str, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE owner = ? AND id = ?"
        ))
        .bind(owner)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// URLs the owner already subscribes to.
    pub async fn get_feed_urls(&self, owner: &str) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM feeds WHERE owner = ?")
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Applies the set fields of `update`. Returns false if no such feed.
    pub async fn update_feed(&self, owner: &str, feed_id: i64, update: &FeedUpdate) -> Result<bool> {
        let title = update.title.as_deref().map(clean_name);
        if title.as_deref() == Some("") {
            bail!("Feed title cannot be empty or whitespace-only");
        }
        let category = update.category.as_deref().map(clean_name);

        let result = sqlx::query(
            "UPDATE feeds SET title = COALESCE(?, title), category = COALESCE(?, category) \
             WHERE owner = ? AND id = ?",
        )
        .bind(title)
        .bind(category)
        .bind(owner)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a feed and, through the foreign key, its articles.
    pub async fn delete_feed(&self, owner: &str, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE owner = ? AND id = ?")
            .bind(owner)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Stamps a successful fetch: clears the error and stores the item count.
    pub async fn record_feed_success(&self, feed_id: i64, article_count: usize) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE feeds SET last_fetched_at = ?, last_error = NULL, article_count = ? WHERE id = ?",
        )
        .bind(now)
        .bind(article_count as i64)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamps a failed fetch, keeping the previous article count.
    pub async fn record_feed_failure(&self, feed_id: i64, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, last_error = ? WHERE id = ?")
            .bind(now)
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
