//! Narrow repository seams. Services in `domain::*` depend on these traits,
//! not on `sqlx::PgPool` directly, so domain services can be unit-tested against fakes
//! instead of an ephemeral database.

use crate::domain::models::{
    Feed, FetchStatus, Item, ItemFilter, ItemState, ItemWithState, ParsedEntry, Subscription, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error>;
    async fn delete(&self, id: Uuid) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn find_by_url(&self, feed_url: &str) -> Result<Option<Feed>, sqlx::Error>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Feed>, sqlx::Error>;
    async fn upsert_by_url(&self, feed_url: &str, title: &str) -> Result<Feed, sqlx::Error>;
    async fn claim_due_for_fetch(&self, limit: i64) -> Result<Vec<Feed>, sqlx::Error>;
    async fn record_fetch_success(
        &self,
        id: Uuid,
        etag: Option<&str>,
        last_modified: Option<&str>,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;
    async fn record_fetch_failure(
        &self,
        id: Uuid,
        error_message: &str,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<i32, sqlx::Error>;
    async fn set_status(&self, id: Uuid, status: FetchStatus) -> Result<(), sqlx::Error>;
    async fn set_favicon(&self, id: Uuid, data: &[u8], mime: &str) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn count_for_user(&self, user_id: Uuid) -> Result<i64, sqlx::Error>;
    async fn find(&self, user_id: Uuid, feed_id: Uuid) -> Result<Option<Subscription>, sqlx::Error>;
    async fn create_checking_cap(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        cap: i64,
    ) -> Result<Subscription, SubscriptionCreateError>;
    async fn delete(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool, sqlx::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionCreateError {
    #[error("subscription cap reached")]
    CapReached,
    #[error("already subscribed")]
    AlreadySubscribed,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Locate an existing item by the guid -> link -> content-hash
    /// priority chain, scoped to `feed_id`.
    async fn find_existing(
        &self,
        feed_id: Uuid,
        guid_or_id: Option<&str>,
        link: Option<&str>,
        content_hash: &str,
    ) -> Result<Option<Item>, sqlx::Error>;

    async fn insert(
        &self,
        feed_id: Uuid,
        entry: &ParsedEntry,
        sanitized_content: Option<&str>,
        sanitized_summary: Option<&str>,
        is_date_estimated: bool,
        content_hash: &str,
    ) -> Result<Item, sqlx::Error>;

    async fn update_content(
        &self,
        id: Uuid,
        entry: &ParsedEntry,
        sanitized_content: Option<&str>,
        sanitized_summary: Option<&str>,
        is_date_estimated: bool,
        content_hash: &str,
    ) -> Result<Item, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, sqlx::Error>;

    async fn due_for_hatebu_fetch(&self, ttl: chrono::Duration, limit: i64) -> Result<Vec<Item>, sqlx::Error>;

    async fn set_hatebu_count(&self, id: Uuid, count: i32) -> Result<(), sqlx::Error>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error>;

    /// `ListItems`'s page query: descending `published_at`, scoped to one
    /// feed and filtered/joined against one user's item state. `limit`
    /// is the caller's page size plus one, for `has_more` detection.
    async fn list_page(
        &self,
        feed_id: Uuid,
        user_id: Uuid,
        filter: ItemFilter,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ItemWithState>, sqlx::Error>;
}

#[async_trait]
pub trait ItemStateRepository: Send + Sync {
    async fn get(&self, user_id: Uuid, item_id: Uuid) -> Result<Option<ItemState>, sqlx::Error>;
    async fn set_read(&self, user_id: Uuid, item_id: Uuid, is_read: bool) -> Result<(), sqlx::Error>;
    async fn set_starred(&self, user_id: Uuid, item_id: Uuid, is_starred: bool) -> Result<(), sqlx::Error>;
}

/// The bookmark job's own singleton back-off state — a property of the job, not of any one
/// feed or item (see `bookmark_job_state`, a single-row table).
#[async_trait]
pub trait BookmarkJobStateRepository: Send + Sync {
    async fn load(&self) -> Result<(i32, Option<DateTime<Utc>>), sqlx::Error>;
    async fn record_success(&self) -> Result<(), sqlx::Error>;
    async fn save(&self, consecutive_errors: i32, backoff_until: Option<DateTime<Utc>>) -> Result<(), sqlx::Error>;
}
