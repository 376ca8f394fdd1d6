use super::traits::BookmarkJobStateRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct PgBookmarkJobStateRepository {
    pool: PgPool,
}

impl PgBookmarkJobStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookmarkJobStateRepository for PgBookmarkJobStateRepository {
    async fn load(&self) -> Result<(i32, Option<DateTime<Utc>>), sqlx::Error> {
        let row: (i32, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT consecutive_errors, backoff_until FROM bookmark_job_state WHERE id = true",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_success(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bookmark_job_state SET consecutive_errors = 0, backoff_until = NULL WHERE id = true",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(
        &self,
        consecutive_errors: i32,
        backoff_until: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE bookmark_job_state SET consecutive_errors = $1, backoff_until = $2 WHERE id = true",
        )
        .bind(consecutive_errors)
        .bind(backoff_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
