use super::fetcher::FetchError;
use crate::storage::Database;

/// Records the outcome of one fetch on the feed row.
///
/// Success stores the item count and clears the last error; failure stores
/// the error message. Both stamp `last_fetched_at`. Store errors are logged
/// and swallowed so bookkeeping never fails a fetch.
pub async fn record_fetch_result(db: &Database, feed_id: i64, result: &Result<usize, FetchError>) {
    let written = match result {
        Ok(count) => db.record_feed_success(feed_id, *count).await,
        Err(e) => db.record_feed_failure(feed_id, &e.to_string()).await,
    };

    if let Err(e) = written {
        tracing::warn!(feed_id, error = %e, "Failed to record feed health");
    }
}
