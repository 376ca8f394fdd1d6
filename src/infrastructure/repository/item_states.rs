use super::traits::ItemStateRepository;
use crate::domain::models::ItemState;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgItemStateRepository {
    pool: PgPool,
}

impl PgItemStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemStateRepository for PgItemStateRepository {
    async fn get(&self, user_id: Uuid, item_id: Uuid) -> Result<Option<ItemState>, sqlx::Error> {
        sqlx::query_as::<_, ItemState>(
            "SELECT * FROM item_states WHERE user_id = $1 AND item_id = $2",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_read(&self, user_id: Uuid, item_id: Uuid, is_read: bool) -> Result<(), sqlx::Error> {
        let read_at = is_read.then(chrono::Utc::now);
        sqlx::query(
            r#"
            INSERT INTO item_states (user_id, item_id, is_read, read_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, item_id) DO UPDATE
                SET is_read = EXCLUDED.is_read, read_at = EXCLUDED.read_at
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(is_read)
        .bind(read_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_starred(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        is_starred: bool,
    ) -> Result<(), sqlx::Error> {
        let starred_at = is_starred.then(chrono::Utc::now);
        sqlx::query(
            r#"
            INSERT INTO item_states (user_id, item_id, is_starred, starred_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, item_id) DO UPDATE
                SET is_starred = EXCLUDED.is_starred, starred_at = EXCLUDED.starred_at
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(is_starred)
        .bind(starred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
