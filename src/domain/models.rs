use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// `feeds.fetch_status` state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Active,
    Error,
    Stopped,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Active => "active",
            FetchStatus::Error => "error",
            FetchStatus::Stopped => "stopped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "error" => FetchStatus::Error,
            "stopped" => FetchStatus::Stopped,
            _ => FetchStatus::Active,
        }
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feed {
    pub id: Uuid,
    pub feed_url: String,
    pub site_url: Option<String>,
    pub title: String,
    pub favicon_data: Option<Vec<u8>>,
    pub favicon_mime: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_status: String,
    pub consecutive_errors: i32,
    pub error_message: Option<String>,
    pub next_fetch_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    pub fn status(&self) -> FetchStatus {
        FetchStatus::from_str(&self.fetch_status)
    }

    pub fn favicon_data_uri(&self) -> Option<String> {
        favicon_data_uri(self.favicon_data.as_deref(), self.favicon_mime.as_deref())
    }
}

/// Shared by `Feed::favicon_data_uri` and the `ListSubscriptions` projection,
/// which carries the same bytes+mime pair through a join rather than a `Feed`.
pub fn favicon_data_uri(data: Option<&[u8]>, mime: Option<&str>) -> Option<String> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let data = data?;
    let mime = mime.unwrap_or("image/x-icon");
    Some(format!("data:{};base64,{}", mime, STANDARD.encode(data)))
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub feed_id: Uuid,
    pub fetch_interval_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum number of subscriptions a single user may hold.
pub const MAX_SUBSCRIPTIONS_PER_USER: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub guid_or_id: Option<String>,
    pub link: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_date_estimated: bool,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    pub hatebu_count: Option<i32>,
    pub hatebu_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a parsed feed entry contributes to the identity/UPSERT pipeline
/// Kept distinct from `Item`: a parsed entry never carries a stable
/// row id, that's what the guid -> link -> content-hash probe resolves.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub guid_or_id: Option<String>,
    pub link: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ItemState {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub is_read: bool,
    pub is_starred: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub starred_at: Option<DateTime<Utc>>,
}

/// `ListItems` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    Unread,
    Starred,
}

impl ItemFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(ItemFilter::All),
            "unread" => Some(ItemFilter::Unread),
            "starred" => Some(ItemFilter::Starred),
            _ => None,
        }
    }
}

/// Item plus the caller's per-user read/starred state, joined for the API
/// plane (`GetItem`, `ListItems`). Absence of an `ItemState` row means
/// unread and unstarred.
#[derive(Debug, Clone, Serialize)]
pub struct ItemWithState {
    pub item: Item,
    pub is_read: bool,
    pub is_starred: bool,
}

/// One row of `ListSubscriptions` — a shaped projection, not a
/// raw table row.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub subscription_id: Uuid,
    pub feed_id: Uuid,
    pub feed_title: String,
    pub feed_url: String,
    pub favicon_data_uri: Option<String>,
    pub fetch_status: String,
    pub error_message: Option<String>,
    pub fetch_interval_minutes: i32,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<ItemWithState>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_status_round_trips_through_str() {
        for s in [FetchStatus::Active, FetchStatus::Error, FetchStatus::Stopped] {
            assert_eq!(FetchStatus::from_str(s.as_str()), s);
        }
    }

    #[test]
    fn item_filter_rejects_unknown_values() {
        assert!(ItemFilter::parse("archived").is_none());
        assert_eq!(ItemFilter::parse("unread"), Some(ItemFilter::Unread));
    }

    #[test]
    fn favicon_data_uri_encodes_bytes() {
        let feed = Feed {
            id: Uuid::nil(),
            feed_url: "https://example.com/feed".into(),
            site_url: None,
            title: "t".into(),
            favicon_data: Some(vec![0xff, 0xd8, 0xff]),
            favicon_mime: Some("image/jpeg".into()),
            etag: None,
            last_modified: None,
            fetch_status: "active".into(),
            consecutive_errors: 0,
            error_message: None,
            next_fetch_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let uri = feed.favicon_data_uri().unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));
    }
}
