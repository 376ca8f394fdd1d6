//! Retention Cleanup. Runs once at worker start, then
//! every 24h: deletes items older than `retention_days`. Item-states cascade
//! via the FK (`migrations/0001_init.sql`).

use crate::infrastructure::repository::ItemRepository;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(items: Arc<dyn ItemRepository>, retention_days: i64, token: CancellationToken) {
    tracing::info!(retention_days, "retention cleanup job started");

    loop {
        run_cycle(&items, retention_days).await;

        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("retention cleanup job cancelled, stopping");
                return;
            }
            _ = tokio::time::sleep(TICK_INTERVAL) => {}
        }
    }
}

async fn run_cycle(items: &Arc<dyn ItemRepository>, retention_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    match items.delete_older_than(cutoff).await {
        Ok(deleted) => tracing::info!(deleted, cutoff = %cutoff, "retention cleanup cycle complete"),
        Err(e) => tracing::error!(error = %e, "retention cleanup cycle failed"),
    }
}
