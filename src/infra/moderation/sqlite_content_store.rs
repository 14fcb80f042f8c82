// SQLite-backed content visibility.
//
// The console has no real course comments or messages to hide, so it keeps a
// `content_visibility` row per (content_kind, object_id) and registers one
// `SqliteVisibilityStore` per content kind with the ContentRegistry.

use crate::infra::moderation::sqlite_moderation_store::timestamp;
use crate::core::moderation::{ContentKind, ContentRegistry, Moderatable, ModerationError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;

pub struct SqliteVisibilityStore {
    pool: Pool<Sqlite>,
    kind: ContentKind,
}

impl SqliteVisibilityStore {
    pub fn new(pool: Pool<Sqlite>, kind: ContentKind) -> Self {
        Self { pool, kind }
    }

    pub async fn migrate(pool: &Pool<Sqlite>) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_visibility (
                content_kind TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                is_approved BOOLEAN NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (content_kind, object_id)
            );
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// A registry with one visibility handler per content kind, all on `pool`.
    pub fn registry(pool: &Pool<Sqlite>) -> ContentRegistry {
        ContentKind::ALL
            .into_iter()
            .fold(ContentRegistry::new(), |registry, kind| {
                registry.with(kind, Arc::new(Self::new(pool.clone(), kind)))
            })
    }

    /// Record a content item as visible. Existing rows are left alone.
    pub async fn track(&self, content_id: u64) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO content_visibility (content_kind, object_id, is_approved, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(content_kind, object_id) DO NOTHING
            "#,
        )
        .bind(self.kind.as_str())
        .bind(content_id as i64)
        .bind(timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// `None` if the item was never tracked.
    pub async fn is_approved(&self, content_id: u64) -> Result<Option<bool>, ModerationError> {
        let row = sqlx::query(
            "SELECT is_approved FROM content_visibility WHERE content_kind = ? AND object_id = ?",
        )
        .bind(self.kind.as_str())
        .bind(content_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        Ok(row.map(|r| r.get::<bool, _>("is_approved")))
    }
}

#[async_trait]
impl Moderatable for SqliteVisibilityStore {
    async fn set_approved(&self, content_id: u64, approved: bool) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE content_visibility
            SET is_approved = ?, updated_at = ?
            WHERE content_kind = ? AND object_id = ?
            "#,
        )
        .bind(approved)
        .bind(timestamp(&Utc::now()))
        .bind(self.kind.as_str())
        .bind(content_id as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::StorageError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::ContentRef;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteVisibilityStore::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_track_and_hide() {
        let pool = memory_pool().await;
        let comments = SqliteVisibilityStore::new(pool.clone(), ContentKind::CourseComment);
        let messages = SqliteVisibilityStore::new(pool, ContentKind::GroupMessage);

        comments.track(1).await.unwrap();
        assert_eq!(comments.is_approved(1).await.unwrap(), Some(true));
        assert_eq!(messages.is_approved(1).await.unwrap(), None);

        assert!(comments.set_approved(1, false).await.unwrap());
        assert_eq!(comments.is_approved(1).await.unwrap(), Some(false));

        // Tracking again does not resurrect hidden content.
        comments.track(1).await.unwrap();
        assert_eq!(comments.is_approved(1).await.unwrap(), Some(false));

        assert!(!messages.set_approved(1, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_updated_at_uses_fixed_width_timestamps() {
        let pool = memory_pool().await;
        let comments = SqliteVisibilityStore::new(pool.clone(), ContentKind::CourseComment);
        comments.track(1).await.unwrap();
        comments.track(2).await.unwrap();
        comments.set_approved(2, false).await.unwrap();

        let stamps: Vec<String> =
            sqlx::query_scalar("SELECT updated_at FROM content_visibility ORDER BY object_id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(stamps.len(), 2);
        for stamp in &stamps {
            assert_eq!(stamp.len(), "2024-03-01T10:00:00.000000Z".len());
            assert!(stamp.ends_with('Z'));
        }
        // Lexical order matches write order.
        assert!(stamps[0] <= stamps[1]);
    }

    #[tokio::test]
    async fn test_registry_covers_every_kind() {
        let pool = memory_pool().await;
        let registry = SqliteVisibilityStore::registry(&pool);

        for kind in ContentKind::ALL {
            assert!(registry.handles(kind));
        }

        let tasks = SqliteVisibilityStore::new(pool, ContentKind::TaskDescription);
        tasks.track(5).await.unwrap();
        registry
            .set_approved(ContentRef::new(ContentKind::TaskDescription, 5), false)
            .await
            .unwrap();
        assert_eq!(tasks.is_approved(5).await.unwrap(), Some(false));
    }
}
