use anyhow::Result;

use super::articles::{ARTICLE_COLUMNS, MAX_PAGE_SIZE};
use super::schema::Database;
use super::types::Article;
use crate::util::char_len;

const MIN_QUERY_CHARS: usize = 2;
const MAX_QUERY_CHARS: usize = 256;

/// Default number of search hits.
pub const SEARCH_LIMIT: i64 = 20;

/// Wraps `query` in `%` wildcards, escaping LIKE metacharacters with `\`.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Database {
    /// Substring search over title, description and author, newest first.
    ///
    /// Matching is case-insensitive for ASCII (SQLite `LIKE`). `%` and `_`
    /// in the query match literally.
    ///
    /// # Errors
    ///
    /// Queries shorter than 2 or longer than 256 characters (after trimming)
    /// are rejected.
    pub async fn search_articles(
        &self,
        owner: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let query = query.trim();
        let len = char_len(query);
        if len < MIN_QUERY_CHARS {
            anyhow::bail!("Search query must be at least {MIN_QUERY_CHARS} characters");
        }
        if len > MAX_QUERY_CHARS {
            anyhow::bail!("Search query exceeds maximum length of {MAX_QUERY_CHARS} characters");
        }

        let pattern = like_pattern(query);
        let articles = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a LEFT JOIN feeds f ON f.id = a.feed_id \
             WHERE a.owner = ? AND (a.title LIKE ? ESCAPE '\\' \
             OR a.description LIKE ? ESCAPE '\\' OR a.author LIKE ? ESCAPE '\\') \
             ORDER BY a.pub_date DESC, a.id DESC LIMIT ?"
        ))
        .bind(owner)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit.clamp(1, MAX_PAGE_SIZE))
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }
}
