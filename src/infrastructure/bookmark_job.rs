//! Bookmark Batch Job. Periodically enriches items with
//! an external bookmark count, chunked to the API's per-call URL cap and
//! rate-limited between chunks. Back-off state is process-wide, not
//! per-item (see `infrastructure::repository::bookmark_job_state`).

use crate::infrastructure::repository::{BookmarkJobStateRepository, ItemRepository};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHUNK_SIZE: usize = 50;
const BOOKMARK_COUNT_ENDPOINT: &str = "https://bookmark.hatenaapi.com/count/entries";

pub struct BookmarkJobConfig {
    pub cycle_interval: Duration,
    pub api_interval: Duration,
    pub max_calls_per_cycle: u32,
    pub ttl: ChronoDuration,
    pub request_timeout: Duration,
}

pub async fn run(
    items: Arc<dyn ItemRepository>,
    state: Arc<dyn BookmarkJobStateRepository>,
    config: BookmarkJobConfig,
    token: CancellationToken,
) {
    let client = match reqwest::Client::builder()
        .user_agent("Feedman/1.0 RSS Reader")
        .timeout(config.request_timeout)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build bookmark job HTTP client, job exiting");
            return;
        }
    };

    tracing::info!(cycle_interval = ?config.cycle_interval, "bookmark batch job started");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("bookmark batch job cancelled, stopping");
                return;
            }
            _ = tokio::time::sleep(config.cycle_interval) => {}
        }

        run_cycle(&items, &state, &client, &config, &token).await;
    }
}

async fn run_cycle(
    items: &Arc<dyn ItemRepository>,
    state: &Arc<dyn BookmarkJobStateRepository>,
    client: &reqwest::Client,
    config: &BookmarkJobConfig,
    token: &CancellationToken,
) {
    let (consecutive_errors, backoff_until) = match state.load().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to load bookmark job state");
            return;
        }
    };

    if let Some(until) = backoff_until {
        if until > Utc::now() {
            tracing::debug!(until = %until, "bookmark job in back-off, skipping cycle");
            return;
        }
    }

    let fetch_limit = (config.max_calls_per_cycle as i64) * (CHUNK_SIZE as i64);
    let candidates = match items.due_for_hatebu_fetch(config.ttl, fetch_limit).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to select bookmark candidates");
            return;
        }
    };

    let mut url_to_items: HashMap<String, Vec<Uuid>> = HashMap::new();
    for item in candidates {
        if let Some(link) = item.link.filter(|l| !l.is_empty()) {
            url_to_items.entry(link).or_default().push(item.id);
        }
    }

    if url_to_items.is_empty() {
        // Vacuously successful (DESIGN.md's reading of the Open Question).
        if let Err(e) = state.record_success().await {
            tracing::error!(error = %e, "failed to record vacuous bookmark cycle success");
        }
        return;
    }

    let urls: Vec<String> = url_to_items.keys().cloned().collect();
    let mut calls_made = 0u32;
    let mut failed_chunks = 0i32;
    let mut first_call = true;

    for chunk in urls.chunks(CHUNK_SIZE) {
        if calls_made >= config.max_calls_per_cycle {
            tracing::info!(calls_made, "bookmark job hit its per-cycle call cap");
            break;
        }

        if !first_call {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("bookmark batch job cancelled mid-cycle");
                    return;
                }
                _ = tokio::time::sleep(config.api_interval) => {}
            }
        }
        first_call = false;

        calls_made += 1;
        match fetch_counts(client, chunk).await {
            Ok(counts) => {
                for url in chunk {
                    let count = counts.get(url).copied().unwrap_or(0);
                    if let Some(item_ids) = url_to_items.get(url) {
                        for item_id in item_ids {
                            if let Err(e) = items.set_hatebu_count(*item_id, count).await {
                                tracing::warn!(%item_id, error = %e, "failed to write bookmark count");
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, chunk_size = chunk.len(), "bookmark count chunk failed");
                failed_chunks += 1;
            }
        }
    }

    if failed_chunks == 0 {
        if let Err(e) = state.record_success().await {
            tracing::error!(error = %e, "failed to record bookmark cycle success");
        }
    } else {
        let new_total = consecutive_errors + failed_chunks;
        let new_backoff_until = backoff_delay(new_total).map(|d| Utc::now() + d);
        if let Err(e) = state.save(new_total, new_backoff_until).await {
            tracing::error!(error = %e, "failed to record bookmark cycle failures");
        }
    }
}

/// Back-off table, keyed by total consecutive API-call
/// failures (not cycles — see DESIGN.md's resolution of the reset-semantics
/// Open Question).
fn backoff_delay(consecutive_errors: i32) -> Option<ChronoDuration> {
    match consecutive_errors {
        0..=2 => None,
        3..=4 => Some(ChronoDuration::minutes(30)),
        5..=9 => Some(ChronoDuration::hours(1)),
        _ => Some(ChronoDuration::hours(6)),
    }
}

async fn fetch_counts(
    client: &reqwest::Client,
    urls: &[String],
) -> Result<HashMap<String, i32>, reqwest::Error> {
    let mut request = client.get(BOOKMARK_COUNT_ENDPOINT);
    for url in urls {
        request = request.query(&[("url", url.as_str())]);
    }
    let response = request.send().await?.error_for_status()?;
    response.json::<HashMap<String, i32>>().await
}
