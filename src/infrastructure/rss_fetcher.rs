//! Feed Fetcher. Runs a conditional GET against an
//! SSRF-safe client, classifies the response, parses feed bodies with
//! `feed-rs`, and sanitizes entry HTML before handing parsed entries to the
//! identity/UPSERT pipeline (`domain::item_service`).

use crate::domain::models::ParsedEntry;
use crate::infrastructure::sanitizer;
use crate::infrastructure::ssrf::{self, SsrfError};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed with status {status}: {message}")]
    RequestFailed {
        status: StatusCode,
        message: String,
        retry_after: Option<String>,
    },

    #[error("URL blocked by SSRF guard: {0}")]
    SsrfBlocked(#[from] SsrfError),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("feed parsing failed: {0}")]
    ParseError(String),
}

/// One parsed entry plus its sanitized HTML fields, ready for identity resolution.
pub type SanitizedEntry = (ParsedEntry, Option<String>, Option<String>);

pub enum FetchOutcome {
    NotModified,
    Updated {
        entries: Vec<SanitizedEntry>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

/// Runs the conditional-GET/parse/sanitize steps (SSRF-safe client construction is the caller's
/// responsibility via [`ssrf::new_safe_client`], reused across ticks).
pub async fn fetch_feed(
    client: &Client,
    feed_url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
    max_size: usize,
) -> Result<FetchOutcome, FetchError> {
    ssrf::validate_url(feed_url)?;

    let mut request = client.get(feed_url);
    if let Some(etag) = etag {
        request = request.header(header::IF_NONE_MATCH, etag);
    }
    if let Some(modified) = last_modified {
        request = request.header(header::IF_MODIFIED_SINCE, modified);
    }

    tracing::debug!(feed_url, "fetching feed");
    let response = request.send().await?;

    if response.status() == StatusCode::NOT_MODIFIED {
        tracing::debug!(feed_url, "feed not modified");
        return Ok(FetchOutcome::NotModified);
    }

    if !response.status().is_success() {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let message = format!(
            "{} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown")
        );
        return Err(FetchError::RequestFailed { status, message, retry_after });
    }

    let new_etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let new_last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = ssrf::read_limited_body(response, max_size)
        .await
        .map_err(FetchError::SsrfBlocked)?;

    let parsed = feed_rs::parser::parse(body.as_slice()).map_err(|e| FetchError::ParseError(e.to_string()))?;

    tracing::info!(
        feed_url,
        entries = parsed.entries.len(),
        "parsed feed"
    );

    let entries = parsed.entries.into_iter().map(sanitize_entry).collect();

    Ok(FetchOutcome::Updated {
        entries,
        etag: new_etag,
        last_modified: new_last_modified,
    })
}

fn sanitize_entry(entry: feed_rs::model::Entry) -> SanitizedEntry {
    let guid_or_id = (!entry.id.is_empty()).then_some(entry.id);
    let link = entry.links.first().map(|l| l.href.clone());
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let author = entry.authors.first().map(|a| a.name.clone());
    let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);

    let raw_content = entry.content.and_then(|c| c.body);
    let raw_summary = entry.summary.map(|s| s.content);

    let sanitized_content = raw_content.as_deref().map(sanitizer::sanitize);
    let sanitized_summary = raw_summary.as_deref().map(sanitizer::sanitize);

    let parsed_entry = ParsedEntry {
        guid_or_id,
        link,
        title,
        content: sanitized_content.clone(),
        summary: sanitized_summary.clone(),
        author,
        published_at,
    };

    (parsed_entry, sanitized_content, sanitized_summary)
}
