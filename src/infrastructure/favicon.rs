//! Favicon fetch. Spawned as a detached task
//! after `RegisterFeed` succeeds; failure is logged and never surfaces to
//! the caller, the same shape as a post-insert metadata enrichment task.

use crate::infrastructure::ssrf;
use std::time::Duration;
use uuid::Uuid;

const FAVICON_TIMEOUT: Duration = Duration::from_secs(5);
const FAVICON_MAX_SIZE: usize = 2 * 1024 * 1024;

pub async fn fetch_and_store_favicon(
    feeds: &dyn crate::infrastructure::repository::FeedRepository,
    feed_id: Uuid,
    site_url: &str,
) {
    match fetch_favicon_bytes(site_url).await {
        Ok(Some((data, mime))) => {
            if let Err(e) = feeds.set_favicon(feed_id, &data, &mime).await {
                tracing::debug!(%feed_id, error = %e, "failed to store favicon");
            }
        }
        Ok(None) => {
            tracing::debug!(%feed_id, "no favicon available");
        }
        Err(e) => {
            tracing::debug!(%feed_id, error = %e, "favicon fetch failed");
        }
    }
}

async fn fetch_favicon_bytes(site_url: &str) -> Result<Option<(Vec<u8>, String)>, ssrf::SsrfError> {
    let favicon_url = format!("{}/favicon.ico", site_url.trim_end_matches('/'));
    ssrf::validate_url(&favicon_url)?;

    let client = ssrf::new_safe_client(FAVICON_TIMEOUT, "Feedman/1.0 RSS Reader")?;
    let response = match client.get(&favicon_url).send().await {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };

    if !response.status().is_success() {
        return Ok(None);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("image/") {
        return Ok(None);
    }

    let data = ssrf::read_limited_body(response, FAVICON_MAX_SIZE).await?;
    Ok(Some((data, content_type)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_favicon_url_blocked_by_ssrf_guard() {
        let result = fetch_favicon_bytes("http://127.0.0.1").await;
        assert!(result.is_err());
    }
}
