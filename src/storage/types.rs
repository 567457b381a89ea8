use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of myfeed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Maps lock-related sqlx errors to [`DatabaseError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Feeds
// ============================================================================

/// Category assigned when a source does not name one.
pub const DEFAULT_CATEGORY: &str = "General";

/// Category of email-bridge sources.
pub const NEWSLETTER_CATEGORY: &str = "Newsletters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedType {
    #[default]
    Rss,
    /// Email newsletter delivered through a feed bridge
    Newsletter,
}

impl FeedType {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedType::Rss => "rss",
            FeedType::Newsletter => "newsletter",
        }
    }
}

impl TryFrom<String> for FeedType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "rss" => Ok(FeedType::Rss),
            "newsletter" => Ok(FeedType::Newsletter),
            other => Err(format!("unknown feed type: {other}")),
        }
    }
}

/// A subscribed source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub owner: String,
    pub url: String,
    pub title: String,
    pub category: String,
    pub folder_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub feed_type: FeedType,
    /// Unix seconds of the last fetch attempt, successful or not
    pub last_fetched_at: Option<i64>,
    /// Message of the last failed fetch; cleared on success
    pub last_error: Option<String>,
    /// Items seen in the last successful fetch
    pub article_count: i64,
    pub created_at: i64,
}

/// Feed row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub category: String,
    pub feed_type: FeedType,
    pub folder_id: Option<i64>,
}

impl NewFeed {
    pub fn rss(url: impl Into<String>, title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            category: category.into(),
            feed_type: FeedType::Rss,
            folder_id: None,
        }
    }
}

/// Editable feed fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub title: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub position: i64,
}

// ============================================================================
// Articles
// ============================================================================

/// A stored article as shown to the reader.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub owner: String,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    /// Teaser, at most 280 chars
    pub description: String,
    pub full_content: Option<String>,
    pub author: Option<String>,
    pub pub_date: Option<i64>,
    pub category: String,
    pub is_read: bool,
    pub is_bookmarked: bool,
    pub is_read_later: bool,
    pub created_at: i64,
    /// Title of the owning feed (joined)
    pub feed_title: Option<String>,
}

/// Article row produced by ingestion.
///
/// User state (`is_read`, bookmarks) is absent on purpose: ingestion can
/// only write feed-derived columns.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub owner: String,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub full_content: Option<String>,
    pub author: Option<String>,
    pub pub_date: Option<i64>,
    pub category: String,
}

/// Counts of rows written by an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadFilter {
    #[default]
    Unread,
    All,
    Read,
}

/// Page request for [`Database::get_articles`](super::Database::get_articles).
#[derive(Debug, Clone)]
pub struct ArticleQuery {
    /// `None` or `"All"` means every category
    pub category: Option<String>,
    pub read_filter: ReadFilter,
    pub limit: i64,
    pub offset: i64,
}

impl ArticleQuery {
    pub const PAGE_SIZE: i64 = 20;
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self {
            category: None,
            read_filter: ReadFilter::Unread,
            limit: Self::PAGE_SIZE,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    /// Matching rows ignoring limit/offset
    pub total: i64,
    pub has_more: bool,
}

/// Reading statistics for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleStats {
    pub total: i64,
    pub read: i64,
    pub bookmarked: i64,
    pub read_later: i64,
    /// Article count per category, largest first
    pub by_category: Vec<(String, i64)>,
}

impl ArticleStats {
    pub fn unread(&self) -> i64 {
        self.total - self.read
    }

    /// Share of articles read, rounded to a whole percent.
    pub fn read_percent(&self) -> i64 {
        if self.total == 0 {
            return 0;
        }
        (self.read * 200 + self.total) / (self.total * 2)
    }
}
