//! Fetch Scheduler. Single-process, cooperative tick
//! loop: claim due feeds under `SKIP LOCKED`, fan out to a bounded worker
//! pool, run the fetcher end to end per feed, and fold the outcome back through
//! `domain::feed_service::update_fetch_state_*`.

use crate::domain::feed_service::{self, SubscriptionRepositoryExt};
use crate::domain::item_service;
use crate::errors::AppResult;
use crate::infrastructure::repository::{FeedRepository, ItemRepository};
use crate::infrastructure::rss_fetcher::{self, FetchOutcome};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_concurrent: usize,
    pub fetch_timeout: Duration,
    pub fetch_max_size: usize,
}

/// Runs until `token` is cancelled. Each tick claims up to
/// `config.max_concurrent` feeds and waits for all of them to finish before
/// sleeping for the next tick — one tick's batch already matches the pool
/// size, so there is no separate back-pressure mechanism to build — the
/// pool is full by construction until the tick's jobs finish.
pub async fn run(
    feeds: Arc<dyn FeedRepository>,
    subscriptions: Arc<dyn SubscriptionRepositoryExt>,
    items: Arc<dyn ItemRepository>,
    config: SchedulerConfig,
    token: CancellationToken,
) {
    let client = match crate::infrastructure::ssrf::new_safe_client(
        config.fetch_timeout,
        "Feedman/1.0 RSS Reader",
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build scheduler HTTP client, scheduler exiting");
            return;
        }
    };

    tracing::info!(
        tick_interval = ?config.tick_interval,
        max_concurrent = config.max_concurrent,
        "fetch scheduler started"
    );

    let base_interval = ChronoDuration::from_std(config.tick_interval).unwrap_or(ChronoDuration::minutes(1));

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("fetch scheduler cancelled, stopping");
                return;
            }
            _ = tokio::time::sleep(config.tick_interval) => {}
        }

        run_tick(&feeds, &subscriptions, &items, &client, &config, base_interval, &token).await;
    }
}

async fn run_tick(
    feeds: &Arc<dyn FeedRepository>,
    subscriptions: &Arc<dyn SubscriptionRepositoryExt>,
    items: &Arc<dyn ItemRepository>,
    client: &reqwest::Client,
    config: &SchedulerConfig,
    base_interval: ChronoDuration,
    token: &CancellationToken,
) {
    let claimed = match feeds.claim_due_for_fetch(config.max_concurrent as i64).await {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::error!(error = %e, "failed to claim due feeds");
            return;
        }
    };

    if claimed.is_empty() {
        return;
    }
    tracing::debug!(count = claimed.len(), "claimed feeds for fetch");

    let mut handles = Vec::with_capacity(claimed.len());
    for feed in claimed {
        let feeds = feeds.clone();
        let subscriptions = subscriptions.clone();
        let items = items.clone();
        let client = client.clone();
        let max_size = config.fetch_max_size;
        let token = token.clone();

        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(feed_id = %feed.id, "fetch job cancelled before completion");
                }
                _ = fetch_one(&*feeds, &*subscriptions, &*items, &client, feed, max_size, base_interval) => {}
            }
        }));
    }

    // Barrier for step 4: "the tick returns when all dispatched jobs finish".
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "fetch job panicked");
        }
    }
}

async fn fetch_one(
    feeds: &dyn FeedRepository,
    subscriptions: &dyn SubscriptionRepositoryExt,
    items: &dyn ItemRepository,
    client: &reqwest::Client,
    feed: crate::domain::models::Feed,
    max_size: usize,
    base_interval: ChronoDuration,
) {
    let feed_id = feed.id;
    let outcome = rss_fetcher::fetch_feed(
        client,
        &feed.feed_url,
        feed.etag.as_deref(),
        feed.last_modified.as_deref(),
        max_size,
    )
    .await;

    match outcome {
        Ok(FetchOutcome::NotModified) => {
            if let Err(e) = apply_success(feeds, subscriptions, feed_id, feed.etag.as_deref(), feed.last_modified.as_deref()).await {
                tracing::error!(%feed_id, error = %e, "failed to update fetch state after 304");
            }
        }
        Ok(FetchOutcome::Updated { entries, etag, last_modified }) => {
            match item_service::upsert_entries(items, feed_id, &entries).await {
                Ok(summary) => {
                    tracing::info!(%feed_id, inserted = summary.inserted, updated = summary.updated, "feed fetched");
                    if let Err(e) = apply_success(feeds, subscriptions, feed_id, etag.as_deref(), last_modified.as_deref()).await {
                        tracing::error!(%feed_id, error = %e, "failed to update fetch state after successful fetch");
                    }
                }
                Err((summary, e)) => {
                    tracing::warn!(%feed_id, inserted = summary.inserted, updated = summary.updated, error = %e, "item persistence failed partway through feed, counting as a fetch failure");
                    if let Err(e) = feed_service::update_fetch_state_error(feeds, feed_id, &e.to_string(), base_interval).await {
                        tracing::error!(%feed_id, error = %e, "failed to update fetch state after upsert failure");
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(%feed_id, error = %e, "feed fetch failed");
            if let Err(e) = feed_service::update_fetch_state_error(feeds, feed_id, &e.to_string(), base_interval).await {
                tracing::error!(%feed_id, error = %e, "failed to update fetch state after error");
            }
        }
    }
}

/// Resolves the success/304 branch of `UpdateFetchState`: looks up the
/// minimum subscriber interval and, unless the feed lost its last subscriber
/// mid-fetch, schedules the next attempt.
async fn apply_success(
    feeds: &dyn FeedRepository,
    subscriptions: &dyn SubscriptionRepositoryExt,
    feed_id: Uuid,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> AppResult<()> {
    let min_minutes = match subscriptions.min_interval_minutes_for_feed(feed_id).await? {
        Some(m) => m,
        None => {
            tracing::debug!(%feed_id, "feed has no subscribers, not rescheduling");
            return Ok(());
        }
    };
    feed_service::update_fetch_state_success(
        feeds,
        feed_id,
        etag,
        last_modified,
        ChronoDuration::minutes(min_minutes as i64),
    )
    .await
}
