//! `RegisterFeed`, `ListSubscriptions`, `UpdateSubscriptionSettings`,
//! `Unsubscribe`, `ResumeFeed`, plus `UpdateFetchState`, the
//! fetch-status state-machine transition.

use crate::domain::models::{
    Feed, FetchStatus, Subscription, SubscriptionSummary, MAX_SUBSCRIPTIONS_PER_USER,
};
use crate::errors::{AppError, AppResult};
use crate::infrastructure::discovery;
use crate::infrastructure::repository::{FeedRepository, SubscriptionCreateError, SubscriptionRepository};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// After 10 consecutive failures the feed is marked `error` (the
/// "recommended N=10").
const ERROR_THRESHOLD: i32 = 10;

/// Past the error threshold, back-off is already capped at 24h (see
/// `next_error_interval`), so ~30 more failures at roughly one per day
/// approximates "30 days of continuous failure" as the threshold for the
/// `error -> stopped` transition.
const STOPPED_THRESHOLD: i32 = ERROR_THRESHOLD + 30;

const BASE_BACKOFF_EXPONENT_CAP: u32 = 8;
const MAX_BACKOFF: Duration = Duration::hours(24);

pub async fn register_feed(
    feeds: &dyn FeedRepository,
    subscriptions: &dyn SubscriptionRepository,
    client: &reqwest::Client,
    user_id: Uuid,
    input_url: &str,
) -> AppResult<(Feed, Subscription)> {
    let canonical_url = discovery::discover_feed_url(client, input_url)
        .await
        .map_err(|e| match e {
            discovery::DiscoveryError::SsrfBlocked(e) => AppError::SsrfBlocked(e.to_string()),
            discovery::DiscoveryError::FeedNotDetected => AppError::FeedNotDetected,
            other => AppError::FetchFailed(other.to_string()),
        })?;

    let feed = feeds.upsert_by_url(&canonical_url, &canonical_url).await?;

    let subscription = subscriptions
        .create_checking_cap(user_id, feed.id, MAX_SUBSCRIPTIONS_PER_USER)
        .await
        .map_err(|e| match e {
            SubscriptionCreateError::CapReached => AppError::SubscriptionLimit(MAX_SUBSCRIPTIONS_PER_USER),
            SubscriptionCreateError::AlreadySubscribed => AppError::DuplicateSubscription,
            SubscriptionCreateError::Database(e) => AppError::from(e),
        })?;

    Ok((feed, subscription))
}

pub async fn list_subscriptions(
    subscriptions: &dyn SubscriptionRepositoryExt,
    user_id: Uuid,
) -> AppResult<Vec<SubscriptionSummary>> {
    Ok(subscriptions.list_for_user(user_id).await?)
}

pub async fn update_subscription_settings(
    subscriptions: &dyn SubscriptionRepositoryExt,
    user_id: Uuid,
    feed_id: Uuid,
    fetch_interval_minutes: i32,
) -> AppResult<()> {
    subscriptions
        .update_interval(user_id, feed_id, fetch_interval_minutes)
        .await
        .map_err(AppError::from)
}

/// `Unsubscribe`: deletes per-(user, feed) item-states then the
/// subscription (the delete order).
pub async fn unsubscribe(
    subscriptions: &dyn SubscriptionRepositoryExt,
    user_id: Uuid,
    feed_id: Uuid,
) -> AppResult<()> {
    subscriptions.delete_item_states_for_feed(user_id, feed_id).await?;
    let deleted = subscriptions.delete(user_id, feed_id).await?;
    if !deleted {
        return Err(AppError::SubscriptionNotFound);
    }
    Ok(())
}

/// `ResumeFeed`: only valid while `stopped`; clears errors and schedules
/// immediately.
pub async fn resume_feed(feeds: &dyn FeedRepository, feed_id: Uuid) -> AppResult<()> {
    let feed = feeds.find_by_id(feed_id).await?.ok_or(AppError::ItemNotFound)?;
    if feed.status() != FetchStatus::Stopped {
        return Err(AppError::FeedNotStopped);
    }
    feeds.record_fetch_success(feed_id, None, None, Utc::now()).await?;
    feeds.set_status(feed_id, FetchStatus::Active).await?;
    Ok(())
}

/// Success/304 path of `UpdateFetchState`: resets the
/// error streak and schedules the next fetch at `now + min subscription
/// interval`. Callers with zero subscribers should not call this — the
/// scheduler only claims feeds with at least one subscriber.
pub async fn update_fetch_state_success(
    feeds: &dyn FeedRepository,
    feed_id: Uuid,
    etag: Option<&str>,
    last_modified: Option<&str>,
    min_subscription_interval: Duration,
) -> AppResult<()> {
    let next_fetch_at = Utc::now() + min_subscription_interval;
    feeds
        .record_fetch_success(feed_id, etag, last_modified, next_fetch_at)
        .await?;
    Ok(())
}

/// Error path of `UpdateFetchState`: increments `consecutive_errors`,
/// computes the back-off interval, and transitions `fetch_status` once the
/// relevant threshold is crossed.
pub async fn update_fetch_state_error(
    feeds: &dyn FeedRepository,
    feed_id: Uuid,
    error_message: &str,
    base_interval: Duration,
) -> AppResult<()> {
    let current = feeds.find_by_id(feed_id).await?.ok_or(AppError::ItemNotFound)?;
    let next_fetch_at = next_error_fetch_at(base_interval, current.consecutive_errors + 1);

    let consecutive_errors = feeds
        .record_fetch_failure(feed_id, error_message, next_fetch_at)
        .await?;

    if consecutive_errors >= STOPPED_THRESHOLD {
        feeds.set_status(feed_id, FetchStatus::Stopped).await?;
    } else if consecutive_errors >= ERROR_THRESHOLD {
        feeds.set_status(feed_id, FetchStatus::Error).await?;
    }

    Ok(())
}

fn next_error_fetch_at(base_interval: Duration, consecutive_errors: i32) -> DateTime<Utc> {
    let exponent = (consecutive_errors - 1).max(0) as u32;
    let exponent = exponent.min(BASE_BACKOFF_EXPONENT_CAP);
    let multiplier = 1i64 << exponent;
    let backoff = base_interval
        .checked_mul(multiplier as i32)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF);
    Utc::now() + backoff
}

/// Extra subscription operations `feed_service` needs beyond the narrow
/// `SubscriptionRepository` seam (kept separate so the item/fetch-scheduler fakes in
/// `item_service`/`scheduler` tests don't have to implement unrelated
/// methods).
#[async_trait::async_trait]
pub trait SubscriptionRepositoryExt: SubscriptionRepository {
    async fn update_interval(&self, user_id: Uuid, feed_id: Uuid, fetch_interval_minutes: i32) -> Result<(), sqlx::Error>;
    async fn delete_item_states_for_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<(), sqlx::Error>;

    /// `next_fetch_at = now + min_subscription_interval(feed_id)`:
    /// `None` when the feed currently has zero subscribers (the caller
    /// should not schedule a next fetch at all in that case).
    async fn min_interval_minutes_for_feed(&self, feed_id: Uuid) -> Result<Option<i32>, sqlx::Error>;

    /// `ListSubscriptions`: one row per subscription, joined against the
    /// feed and this user's unread count.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SubscriptionSummary>, sqlx::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap_and_then_holds() {
        let base = Duration::minutes(30);
        let t1 = next_error_fetch_at(base, 1) - Utc::now();
        let t2 = next_error_fetch_at(base, 2) - Utc::now();
        let t10 = next_error_fetch_at(base, 20) - Utc::now();
        assert!(t1 < t2);
        assert!(t10 <= MAX_BACKOFF + Duration::seconds(1));
    }

    #[test]
    fn stopped_threshold_is_past_error_threshold() {
        assert!(STOPPED_THRESHOLD > ERROR_THRESHOLD);
    }
}
