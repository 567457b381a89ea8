mod articles;
mod feeds;
mod folders;
mod schema;
mod search;
mod types;

pub use schema::Database;
pub use search::SEARCH_LIMIT;
pub use types::{
    Article, ArticlePage, ArticleQuery, ArticleStats, DatabaseError, Feed, FeedType, FeedUpdate,
    Folder, NewArticle, NewFeed, ReadFilter, UpsertOutcome, DEFAULT_CATEGORY, NEWSLETTER_CATEGORY,
};
