use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Folder;
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// Strips control characters and trims; empty names are rejected.
    fn sanitize_folder_name(name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Folder name cannot be empty or whitespace-only");
        }
        Ok(trimmed.to_owned())
    }

    /// Creates a folder at the end of the owner's list.
    pub async fn create_folder(&self, owner: &str, name: &str) -> Result<Folder> {
        let clean_name = Self::sanitize_folder_name(name)?;

        let folder: Folder = sqlx::query_as(
            "INSERT INTO folders (owner, name, position) \
             VALUES (?, ?, (SELECT COALESCE(MAX(position) + 1, 0) FROM folders WHERE owner = ?)) \
             RETURNING id, owner, name, position",
        )
        .bind(owner)
        .bind(&clean_name)
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok(folder)
    }

    pub async fn rename_folder(&self, owner: &str, id: i64, new_name: &str) -> Result<bool> {
        let clean_name = Self::sanitize_folder_name(new_name)?;

        let result = sqlx::query("UPDATE folders SET name = ? WHERE owner = ? AND id = ?")
            .bind(&clean_name)
            .bind(owner)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rewrites folder positions to follow `ordered_ids`.
    ///
    /// Ids that are not the owner's are ignored.
    pub async fn reorder_folders(&self, owner: &str, ordered_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (position, id) in ordered_ids.iter().enumerate() {
            sqlx::query("UPDATE folders SET position = ? WHERE owner = ? AND id = ?")
                .bind(position as i64)
                .bind(owner)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Deletes a folder. Its feeds become unfiled.
    pub async fn delete_folder(&self, owner: &str, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE feeds SET folder_id = NULL WHERE owner = ? AND folder_id = ?")
            .bind(owner)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM folders WHERE owner = ? AND id = ?")
            .bind(owner)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Files a feed under a folder, or unfiles it when `folder_id` is `None`.
    pub async fn move_feed_to_folder(
        &self,
        owner: &str,
        feed_id: i64,
        folder_id: Option<i64>,
    ) -> Result<bool> {
        if let Some(fid) = folder_id {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM folders WHERE owner = ? AND id = ?")
                    .bind(owner)
                    .bind(fid)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                bail!("Folder {fid} does not exist");
            }
        }

        let result = sqlx::query("UPDATE feeds SET folder_id = ? WHERE owner = ? AND id = ?")
            .bind(folder_id)
            .bind(owner)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_folders(&self, owner: &str) -> Result<Vec<Folder>> {
        let folders = sqlx::query_as(
            "SELECT id, owner, name, position FROM folders WHERE owner = ? ORDER BY position, name",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewFeed};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_appends_positions() {
        let db = test_db().await;
        let a = db.create_folder("alice", "News").await.unwrap();
        let b = db.create_folder("alice", "  Tech  ").await.unwrap();
        let other = db.create_folder("bob", "Mine").await.unwrap();

        assert_eq!(a.position, 0);
        assert_eq!(b.position, 1);
        assert_eq!(b.name, "Tech");
        assert_eq!(other.position, 0);
        assert_eq!(db.get_folders("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_blank_names() {
        let db = test_db().await;
        assert!(db.create_folder("alice", "   ").await.is_err());
        assert!(db.create_folder("alice", "\x07\x1b\t").await.is_err());
    }

    #[tokio::test]
    async fn test_rename_scoped_to_owner() {
        let db = test_db().await;
        let folder = db.create_folder("alice", "Old").await.unwrap();

        assert!(!db.rename_folder("bob", folder.id, "Stolen").await.unwrap());
        assert!(db.rename_folder("alice", folder.id, "New").await.unwrap());
        assert_eq!(db.get_folders("alice").await.unwrap()[0].name, "New");
    }

    #[tokio::test]
    async fn test_reorder() {
        let db = test_db().await;
        let a = db.create_folder("alice", "A").await.unwrap();
        let b = db.create_folder("alice", "B").await.unwrap();
        let c = db.create_folder("alice", "C").await.unwrap();

        db.reorder_folders("alice", &[c.id, a.id, b.id]).await.unwrap();
        let names: Vec<_> = db
            .get_folders("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_delete_unfiles_feeds() {
        let db = test_db().await;
        let folder = db.create_folder("alice", "Tech").await.unwrap();
        let feed = db
            .insert_feed("alice", &NewFeed::rss("https://a.example.com/rss", "A", "Tech"))
            .await
            .unwrap();

        assert!(db.move_feed_to_folder("alice", feed.id, Some(folder.id)).await.unwrap());
        assert_eq!(
            db.get_feed("alice", feed.id).await.unwrap().unwrap().folder_id,
            Some(folder.id)
        );

        assert!(db.delete_folder("alice", folder.id).await.unwrap());
        let feed = db.get_feed("alice", feed.id).await.unwrap().unwrap();
        assert_eq!(feed.folder_id, None);
        assert!(db.get_folders("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_to_foreign_folder_rejected() {
        let db = test_db().await;
        let bobs = db.create_folder("bob", "Private").await.unwrap();
        let feed = db
            .insert_feed("alice", &NewFeed::rss("https://a.example.com/rss", "A", "Tech"))
            .await
            .unwrap();

        assert!(db.move_feed_to_folder("alice", feed.id, Some(bobs.id)).await.is_err());
        assert!(db.move_feed_to_folder("alice", feed.id, None).await.unwrap());
    }
}
