//! Shared error taxonomy. Leaf modules keep their own
//! `thiserror` enums (e.g. `infrastructure::ssrf::SsrfError`,
//! `infrastructure::rss_fetcher::FetchError`) as leaf taxonomies, and
//! `From` into `AppError` at the service boundary so callers across every module
//! see one taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL blocked by SSRF policy: {0}")]
    SsrfBlocked(String),

    #[error("feed fetch failed: {0}")]
    FetchFailed(String),

    #[error("no feed could be detected at that URL")]
    FeedNotDetected,

    #[error("subscription limit reached ({0} max)")]
    SubscriptionLimit(i64),

    #[error("already subscribed to this feed")]
    DuplicateSubscription,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("feed is not stopped")]
    FeedNotStopped,

    #[error("item not found")]
    ItemNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("feed body could not be parsed: {0}")]
    ParseFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidUrl(_) => "INVALID_URL",
            AppError::SsrfBlocked(_) => "SSRF_BLOCKED",
            AppError::FetchFailed(_) => "FETCH_FAILED",
            AppError::FeedNotDetected => "FEED_NOT_DETECTED",
            AppError::SubscriptionLimit(_) => "SUBSCRIPTION_LIMIT",
            AppError::DuplicateSubscription => "DUPLICATE_SUBSCRIPTION",
            AppError::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            AppError::FeedNotStopped => "FEED_NOT_STOPPED",
            AppError::ItemNotFound => "ITEM_NOT_FOUND",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::InvalidFilter(_) => "INVALID_FILTER",
            AppError::ParseFailure(_) => "PARSE_FAILURE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error counts against a feed's fetch back-off
    /// propagation policy: FETCH_FAILED and PARSE_FAILURE both do).
    pub fn counts_as_fetch_failure(&self) -> bool {
        matches!(self, AppError::FetchFailed(_) | AppError::ParseFailure(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::ItemNotFound,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<crate::infrastructure::ssrf::SsrfError> for AppError {
    fn from(e: crate::infrastructure::ssrf::SsrfError) -> Self {
        AppError::SsrfBlocked(e.to_string())
    }
}

impl From<crate::infrastructure::rss_fetcher::FetchError> for AppError {
    fn from(e: crate::infrastructure::rss_fetcher::FetchError) -> Self {
        use crate::infrastructure::rss_fetcher::FetchError as E;
        match e {
            E::ParseError(msg) => AppError::ParseFailure(msg),
            other => AppError::FetchFailed(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec_taxonomy() {
        assert_eq!(AppError::FeedNotDetected.code(), "FEED_NOT_DETECTED");
        assert_eq!(AppError::SubscriptionLimit(100).code(), "SUBSCRIPTION_LIMIT");
    }

    #[test]
    fn only_fetch_and_parse_failures_count_against_backoff() {
        assert!(AppError::FetchFailed("x".into()).counts_as_fetch_failure());
        assert!(AppError::ParseFailure("x".into()).counts_as_fetch_failure());
        assert!(!AppError::ItemNotFound.counts_as_fetch_failure());
    }
}
