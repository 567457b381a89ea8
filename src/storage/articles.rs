use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::schema::Database;
use super::types::{
    Article, ArticlePage, ArticleQuery, ArticleStats, NewArticle, ReadFilter, UpsertOutcome,
};

/// Maximum page size accepted by [`Database::get_articles`]
pub(super) const MAX_PAGE_SIZE: i64 = 500;

pub(super) const ARTICLE_COLUMNS: &str = "a.id, a.owner, a.feed_id, a.guid, a.title, a.link, a.description, \
     a.full_content, a.author, a.pub_date, a.category, a.is_read, a.is_bookmarked, \
     a.is_read_later, a.created_at, f.title AS feed_title";

/// Collapses rows sharing `(owner, guid)`.
///
/// The last occurrence wins and takes the slot of the first, so a batch that
/// repeats an entry keeps its newest data without reordering the rest. A
/// single upsert statement cannot touch the same conflict target twice.
pub(crate) fn dedupe_articles(rows: &[NewArticle]) -> Vec<&NewArticle> {
    let mut slots: HashMap<(&str, &str), usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&NewArticle> = Vec::with_capacity(rows.len());

    for row in rows {
        match slots.entry((row.owner.as_str(), row.guid.as_str())) {
            Entry::Occupied(slot) => unique[*slot.get()] = row,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(row);
            }
        }
    }

    unique
}

async fn count_owned(conn: &mut sqlx::SqliteConnection, owners: &[&str]) -> Result<i64> {
    let mut count: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM articles WHERE owner IN (");
    let mut list = count.separated(", ");
    for owner in owners {
        list.push_bind(*owner);
    }
    list.push_unseparated(")");
    let (n,): (i64,) = count.build_query_as().fetch_one(conn).await?;
    Ok(n)
}

impl Database {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Inserts or refreshes articles keyed by `(owner, guid)`.
    ///
    /// Rows are deduplicated first (see [`dedupe_articles`]) and written in a
    /// single transaction, so a failure leaves the store untouched.
    ///
    /// On conflict the feed-derived columns are overwritten; `full_content`
    /// only when the incoming value is present. `category`, read state,
    /// bookmarks and `created_at` of existing rows are never changed.
    /// Batch size of 50 keeps us under SQLite's parameter limit (10 columns * 50).
    pub async fn upsert_articles(&self, rows: &[NewArticle]) -> Result<UpsertOutcome> {
        let unique = dedupe_articles(rows);
        if unique.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let now = chrono::Utc::now().timestamp();
        let mut owners: Vec<&str> = unique.iter().map(|a| a.owner.as_str()).collect();
        owners.sort_unstable();
        owners.dedup();

        // Take the write lock up front; a deferred read lock cannot be
        // upgraded while another writer holds the file.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let before = count_owned(&mut tx, &owners).await?;

        const BATCH_SIZE: usize = 50;
        for chunk in unique.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (owner, feed_id, guid, title, link, description, \
                 full_content, author, pub_date, category, created_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(&article.owner)
                    .push_bind(article.feed_id)
                    .push_bind(&article.guid)
                    .push_bind(&article.title)
                    .push_bind(&article.link)
                    .push_bind(&article.description)
                    .push_bind(&article.full_content)
                    .push_bind(&article.author)
                    .push_bind(article.pub_date)
                    .push_bind(&article.category)
                    .push_bind(now);
            });

            builder.push(
                " ON CONFLICT(owner, guid) DO UPDATE SET \
                 feed_id = excluded.feed_id, \
                 title = excluded.title, \
                 link = excluded.link, \
                 description = excluded.description, \
                 author = excluded.author, \
                 pub_date = excluded.pub_date, \
                 full_content = COALESCE(excluded.full_content, articles.full_content)",
            );

            builder.build().execute(&mut *tx).await?;
        }

        let after = count_owned(&mut tx, &owners).await?;
        tx.commit().await?;

        let inserted = (after - before).max(0) as usize;
        Ok(UpsertOutcome {
            inserted,
            updated: unique.len().saturating_sub(inserted),
        })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// One page of the owner's articles, newest first.
    ///
    /// `total` counts every matching row so callers can page; `has_more`
    /// is `offset + limit < total`.
    pub async fn get_articles(&self, owner: &str, query: &ArticleQuery) -> Result<ArticlePage> {
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.max(0);

        let mut count: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM articles a WHERE ");
        push_filters(&mut count, owner, query);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a LEFT JOIN feeds f ON f.id = a.feed_id WHERE "
        ));
        push_filters(&mut select, owner, query);
        select.push(" ORDER BY a.pub_date DESC, a.id DESC LIMIT ");
        select.push_bind(limit);
        select.push(" OFFSET ");
        select.push_bind(offset);
        let articles: Vec<Article> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(ArticlePage {
            articles,
            total,
            has_more: offset + limit < total,
        })
    }

    pub async fn get_article(&self, owner: &str, article_id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a LEFT JOIN feeds f ON f.id = a.feed_id \
             WHERE a.owner = ? AND a.id = ?"
        ))
        .bind(owner)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    /// Articles saved for later, newest first.
    pub async fn get_read_later(&self, owner: &str) -> Result<Vec<Article>> {
        let articles = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a LEFT JOIN feeds f ON f.id = a.feed_id \
             WHERE a.owner = ? AND a.is_read_later = 1 ORDER BY a.pub_date DESC, a.id DESC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn count_articles(&self, owner: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE owner = ?")
            .bind(owner)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Read-state totals and per-category counts for the owner's articles.
    pub async fn get_stats(&self, owner: &str) -> Result<ArticleStats> {
        let (total, read, bookmarked, read_later): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_read), 0), COALESCE(SUM(is_bookmarked), 0), \
             COALESCE(SUM(is_read_later), 0) FROM articles WHERE owner = ?",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        let by_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) AS n FROM articles WHERE owner = ? \
             GROUP BY category ORDER BY n DESC, category",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(ArticleStats {
            total,
            read,
            bookmarked,
            read_later,
            by_category,
        })
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Sets the read flag, returns whether the article changed.
    pub async fn set_article_read(&self, owner: &str, article_id: i64, read: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE articles SET is_read = ? WHERE owner = ? AND id = ? AND is_read != ?",
        )
        .bind(read)
        .bind(owner)
        .bind(article_id)
        .bind(read)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets the read flag on many articles, returns how many changed.
    pub async fn set_articles_read(&self, owner: &str, article_ids: &[i64], read: bool) -> Result<u64> {
        if article_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE articles SET is_read = ");
        builder.push_bind(read);
        builder.push(" WHERE owner = ");
        builder.push_bind(owner);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in article_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Marks every unread article of the owner as read, returns the count.
    pub async fn mark_all_read(&self, owner: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE articles SET is_read = 1 WHERE owner = ? AND is_read = 0")
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomically flips the bookmark flag, returning the new value or `None`
    /// if the article does not exist.
    pub async fn toggle_bookmark(&self, owner: &str, article_id: i64) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(
            "UPDATE articles SET is_bookmarked = NOT is_bookmarked \
             WHERE owner = ? AND id = ? RETURNING is_bookmarked",
        )
        .bind(owner)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Atomically flips the read-later flag, returning the new value or `None`
    /// if the article does not exist.
    pub async fn toggle_read_later(&self, owner: &str, article_id: i64) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(
            "UPDATE articles SET is_read_later = NOT is_read_later \
             WHERE owner = ? AND id = ? RETURNING is_read_later",
        )
        .bind(owner)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Stores resolved article text so later reads skip the network.
    pub async fn set_full_content(&self, owner: &str, article_id: i64, content: &str) -> Result<()> {
        sqlx::query("UPDATE articles SET full_content = ? WHERE owner = ? AND id = ?")
            .bind(content)
            .bind(owner)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes every article of the owner, keeping the feeds.
    pub async fn clear_articles(&self, owner: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM articles WHERE owner = ?")
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, sqlx::Sqlite>, owner: &'a str, query: &'a ArticleQuery) {
    builder.push("a.owner = ");
    builder.push_bind(owner);

    if let Some(category) = query.category.as_deref().filter(|c| *c != "All") {
        builder.push(" AND a.category = ");
        builder.push_bind(category);
    }

    match query.read_filter {
        ReadFilter::Unread => {
            builder.push(" AND a.is_read = 0");
        }
        ReadFilter::Read => {
            builder.push(" AND a.is_read = 1");
        }
        ReadFilter::All => {}
    }
}
