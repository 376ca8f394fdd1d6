use super::traits::FeedRepository;
use crate::domain::models::{Feed, FetchStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgFeedRepository {
    pool: PgPool,
}

impl PgFeedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedRepository for PgFeedRepository {
    async fn find_by_url(&self, feed_url: &str) -> Result<Option<Feed>, sqlx::Error> {
        sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE feed_url = $1")
            .bind(feed_url)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Feed>, sqlx::Error> {
        sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Feed rows are keyed by canonical URL; registering a second
    /// subscription to an already-known feed must not create a duplicate
    /// row (feed upsert-by-url).
    async fn upsert_by_url(&self, feed_url: &str, title: &str) -> Result<Feed, sqlx::Error> {
        sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (feed_url, title)
            VALUES ($1, $2)
            ON CONFLICT (feed_url) DO UPDATE SET feed_url = EXCLUDED.feed_url
            RETURNING *
            "#,
        )
        .bind(feed_url)
        .bind(title)
        .fetch_one(&self.pool)
        .await
    }

    /// Row-lock acquire for the fetch scheduler: only `active`, overdue feeds with at least one
    /// subscriber, locked with `SKIP LOCKED` so two scheduler workers never
    /// pick the same row.
    async fn claim_due_for_fetch(&self, limit: i64) -> Result<Vec<Feed>, sqlx::Error> {
        sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            WHERE fetch_status = 'active'
              AND next_fetch_at <= now()
              AND EXISTS (SELECT 1 FROM subscriptions WHERE subscriptions.feed_id = feeds.id)
            ORDER BY next_fetch_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn record_fetch_success(
        &self,
        id: Uuid,
        etag: Option<&str>,
        last_modified: Option<&str>,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET etag = $1, last_modified = $2, next_fetch_at = $3,
                consecutive_errors = 0, error_message = NULL,
                fetch_status = 'active', updated_at = now()
            WHERE id = $4
            "#,
        )
        .bind(etag)
        .bind(last_modified)
        .bind(next_fetch_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_fetch_failure(
        &self,
        id: Uuid,
        error_message: &str,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<i32, sqlx::Error> {
        let row: (i32,) = sqlx::query_as(
            r#"
            UPDATE feeds
            SET consecutive_errors = consecutive_errors + 1,
                error_message = $1,
                next_fetch_at = $2,
                updated_at = now()
            WHERE id = $3
            RETURNING consecutive_errors
            "#,
        )
        .bind(error_message)
        .bind(next_fetch_at)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn set_status(&self, id: Uuid, status: FetchStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE feeds SET fetch_status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_favicon(&self, id: Uuid, data: &[u8], mime: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE feeds SET favicon_data = $1, favicon_mime = $2, updated_at = now() WHERE id = $3",
        )
        .bind(data)
        .bind(mime)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
