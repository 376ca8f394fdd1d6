use super::traits::{SubscriptionCreateError, SubscriptionRepository};
use crate::domain::models::{favicon_data_uri, Subscription, SubscriptionSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct SubscriptionSummaryRow {
    subscription_id: Uuid,
    feed_id: Uuid,
    feed_title: String,
    feed_url: String,
    favicon_data: Option<Vec<u8>>,
    favicon_mime: Option<String>,
    fetch_status: String,
    error_message: Option<String>,
    fetch_interval_minutes: i32,
    created_at: DateTime<Utc>,
    unread_count: i64,
}

impl From<SubscriptionSummaryRow> for SubscriptionSummary {
    fn from(r: SubscriptionSummaryRow) -> Self {
        SubscriptionSummary {
            subscription_id: r.subscription_id,
            feed_id: r.feed_id,
            feed_title: r.feed_title,
            feed_url: r.feed_url,
            favicon_data_uri: favicon_data_uri(r.favicon_data.as_deref(), r.favicon_mime.as_deref()),
            fetch_status: r.fetch_status,
            error_message: r.error_message,
            fetch_interval_minutes: r.fetch_interval_minutes,
            unread_count: r.unread_count,
            created_at: r.created_at,
        }
    }
}

pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn count_for_user(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn find(&self, user_id: Uuid, feed_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND feed_id = $2",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolves the subscription-cap race (DESIGN.md) by re-checking the
    /// caller's own subscription count under `FOR UPDATE` inside the same
    /// transaction that inserts the new row, so two concurrent
    /// `RegisterFeed` calls for the same user can't both slip past the cap.
    async fn create_checking_cap(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        cap: i64,
    ) -> Result<Subscription, SubscriptionCreateError> {
        let mut tx = self.pool.begin().await?;

        // Locks this user's existing subscription rows for the duration of
        // the transaction; a second concurrent caller blocks here until the
        // first commits or rolls back, then sees the up-to-date count.
        sqlx::query("SELECT id FROM subscriptions WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_all(&mut *tx)
            .await?;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        if count.0 >= cap {
            tx.rollback().await?;
            return Err(SubscriptionCreateError::CapReached);
        }

        let existing: Option<Subscription> = sqlx::query_as(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND feed_id = $2",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Err(SubscriptionCreateError::AlreadySubscribed);
        }

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, feed_id)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(subscription)
    }

    async fn delete(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND feed_id = $2")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl crate::domain::feed_service::SubscriptionRepositoryExt for PgSubscriptionRepository {
    async fn update_interval(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        fetch_interval_minutes: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET fetch_interval_minutes = $1, updated_at = now()
            WHERE user_id = $2 AND feed_id = $3
            "#,
        )
        .bind(fetch_interval_minutes)
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The interval a successful fetch schedules the next one
    /// at is the *minimum* any current subscriber asked for; `None` when
    /// nobody is currently subscribed.
    async fn min_interval_minutes_for_feed(&self, feed_id: Uuid) -> Result<Option<i32>, sqlx::Error> {
        let row: (Option<i32>,) = sqlx::query_as(
            "SELECT MIN(fetch_interval_minutes) FROM subscriptions WHERE feed_id = $1",
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// `ListSubscriptions`: joins each subscription to its feed and counts
    /// this user's unread items in that feed via a correlated subquery.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SubscriptionSummary>, sqlx::Error> {
        let rows = sqlx::query_as::<_, SubscriptionSummaryRow>(
            r#"
            SELECT
                subscriptions.id AS subscription_id,
                subscriptions.feed_id,
                feeds.title AS feed_title,
                feeds.feed_url,
                feeds.favicon_data,
                feeds.favicon_mime,
                feeds.fetch_status,
                feeds.error_message,
                subscriptions.fetch_interval_minutes,
                subscriptions.created_at,
                (
                    SELECT COUNT(*) FROM items
                    LEFT JOIN item_states
                        ON item_states.item_id = items.id AND item_states.user_id = $1
                    WHERE items.feed_id = subscriptions.feed_id
                      AND COALESCE(item_states.is_read, false) = false
                ) AS unread_count
            FROM subscriptions
            JOIN feeds ON feeds.id = subscriptions.feed_id
            WHERE subscriptions.user_id = $1
            ORDER BY subscriptions.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SubscriptionSummary::from).collect())
    }

    /// `Unsubscribe`'s first step: drop this user's per-item state for
    /// every item belonging to `feed_id`, ahead of the subscription row
    /// itself (the stated delete order: item-states before subscriptions).
    async fn delete_item_states_for_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM item_states
            WHERE user_id = $1
              AND item_id IN (SELECT id FROM items WHERE feed_id = $2)
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
