//! `WithdrawUser`: delete order item-states -> subscriptions ->
//! sessions -> user; feeds/items persist as shared cache across users.

use crate::errors::AppResult;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn withdraw_user(pool: &PgPool, user_id: Uuid) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM item_states WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
