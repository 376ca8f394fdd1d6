//! Article Identity & UPSERT, plus the read-side
//! operations that work against already-stored items
//! (`ListItems`/`GetItem`/`UpdateItemState`).

use crate::domain::models::{ItemFilter, ItemPage, ItemState, ItemWithState, ParsedEntry};
use crate::errors::{AppError, AppResult};
use crate::infrastructure::repository::{ItemRepository, ItemStateRepository};
use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Outcome of running identity resolution over one feed's parsed entries —
/// the first persistence failure aborts the remaining items in that feed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// `content_hash = SHA-256(title | RFC3339(UTC(published_at), truncated to
/// seconds) or "" | sanitized_summary)`. Truncating to seconds keeps two
/// fetches that differ only in sub-second precision from hashing to
/// different tier-3 identities.
pub fn content_hash(title: &str, published_at: Option<DateTime<Utc>>, sanitized_summary: Option<&str>) -> String {
    let timestamp = published_at
        .map(|ts| ts.trunc_subsecs(0).to_rfc3339())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"|");
    hasher.update(sanitized_summary.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Runs the priority-chain UPSERT for every entry parsed from one feed.
/// Stops at the first persistence error (`sqlx::Error`), returning what was
/// accumulated so far alongside the error.
pub async fn upsert_entries(
    items: &dyn ItemRepository,
    feed_id: Uuid,
    entries: &[(ParsedEntry, Option<String>, Option<String>)],
) -> Result<UpsertSummary, (UpsertSummary, sqlx::Error)> {
    let mut summary = UpsertSummary::default();

    for (entry, sanitized_content, sanitized_summary) in entries {
        let hash = content_hash(&entry.title, entry.published_at, sanitized_summary.as_deref());

        let existing = match items
            .find_existing(feed_id, entry.guid_or_id.as_deref(), entry.link.as_deref(), &hash)
            .await
        {
            Ok(existing) => existing,
            Err(e) => return Err((summary, e)),
        };

        let has_timestamp = entry.published_at.is_some();

        match existing {
            Some(row) => {
                let mut effective_entry = entry.clone();
                let is_date_estimated = if has_timestamp {
                    false
                } else {
                    // Keep the prior timestamp and its estimated-ness; only
                    // the mutable content fields are overwritten on a hit
                    // when the parsed entry carries no usable date.
                    effective_entry.published_at = row.published_at;
                    row.is_date_estimated
                };
                if let Err(e) = items
                    .update_content(
                        row.id,
                        &effective_entry,
                        sanitized_content.as_deref(),
                        sanitized_summary.as_deref(),
                        is_date_estimated,
                        &hash,
                    )
                    .await
                {
                    return Err((summary, e));
                }
                summary.updated += 1;
            }
            None => {
                let is_date_estimated = !has_timestamp;
                let mut effective_entry = entry.clone();
                if !has_timestamp {
                    // "published_at = fetched_at"; `fetched_at`
                    // itself is the row's DB-side `now()` default, so this is
                    // the same instant for all practical purposes.
                    effective_entry.published_at = Some(Utc::now());
                }
                if let Err(e) = items
                    .insert(
                        feed_id,
                        &effective_entry,
                        sanitized_content.as_deref(),
                        sanitized_summary.as_deref(),
                        is_date_estimated,
                        &hash,
                    )
                    .await
                {
                    return Err((summary, e));
                }
                summary.inserted += 1;
            }
        }
    }

    Ok(summary)
}

pub async fn get_item(
    items: &dyn ItemRepository,
    states: &dyn ItemStateRepository,
    user_id: Uuid,
    item_id: Uuid,
) -> AppResult<ItemWithState> {
    let item = items.find_by_id(item_id).await?.ok_or(AppError::ItemNotFound)?;
    let state = states.get(user_id, item_id).await?;
    Ok(with_state(item, state))
}

/// `UpdateItemState`: partial update, `None` fields retain their prior
/// value; the state row is created lazily on first write.
pub async fn update_item_state(
    states: &dyn ItemStateRepository,
    user_id: Uuid,
    item_id: Uuid,
    is_read: Option<bool>,
    is_starred: Option<bool>,
) -> AppResult<()> {
    if let Some(is_read) = is_read {
        states.set_read(user_id, item_id, is_read).await?;
    }
    if let Some(is_starred) = is_starred {
        states.set_starred(user_id, item_id, is_starred).await?;
    }
    Ok(())
}

fn with_state(item: crate::domain::models::Item, state: Option<ItemState>) -> ItemWithState {
    let (is_read, is_starred) = state.map(|s| (s.is_read, s.is_starred)).unwrap_or((false, false));
    ItemWithState { item, is_read, is_starred }
}

pub fn parse_filter(raw: &str) -> AppResult<ItemFilter> {
    ItemFilter::parse(raw).ok_or_else(|| AppError::InvalidFilter(raw.to_string()))
}

/// `ListItems`: fetches `limit + 1` rows from the repository's one-statement
/// page query and lets `build_page` turn the extra row into `has_more`.
/// `cursor`, when present, is the RFC3339Nano `published_at` of the last
/// item the caller already has.
pub async fn list_items(
    items: &dyn ItemRepository,
    user_id: Uuid,
    feed_id: Uuid,
    filter: ItemFilter,
    cursor: Option<&str>,
    limit: usize,
) -> AppResult<ItemPage> {
    let cursor = cursor
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| AppError::InvalidFilter(format!("invalid cursor: {raw}")))
        })
        .transpose()?;

    let rows = items
        .list_page(feed_id, user_id, filter, cursor, (limit + 1) as i64)
        .await?;
    Ok(build_page(rows, limit))
}

/// Turns a `limit + 1`-sized row fetch into a page: the extra row (if
/// present) signals `has_more` and is dropped rather than returned.
pub fn build_page(mut items: Vec<ItemWithState>, limit: usize) -> ItemPage {
    let has_more = items.len() > limit;
    if has_more {
        items.truncate(limit);
    }
    let next_cursor = items
        .last()
        .and_then(|i| i.item.published_at)
        .map(|ts| ts.to_rfc3339());
    ItemPage { items, next_cursor, has_more }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Item;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeItemRepository {
        items: Mutex<Vec<Item>>,
    }

    fn fake_item(id: Uuid, feed_id: Uuid, guid: Option<&str>, link: Option<&str>, hash: &str) -> Item {
        Item {
            id,
            feed_id,
            guid_or_id: guid.map(str::to_string),
            link: link.map(str::to_string),
            title: "t".to_string(),
            content: None,
            summary: None,
            author: None,
            published_at: None,
            is_date_estimated: true,
            fetched_at: Utc::now(),
            content_hash: hash.to_string(),
            hatebu_count: None,
            hatebu_fetched_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[async_trait]
    impl ItemRepository for FakeItemRepository {
        async fn find_existing(
            &self,
            feed_id: Uuid,
            guid_or_id: Option<&str>,
            link: Option<&str>,
            content_hash: &str,
        ) -> Result<Option<Item>, sqlx::Error> {
            let items = self.items.lock().unwrap();
            if let Some(guid) = guid_or_id {
                if let Some(found) = items.iter().find(|i| i.feed_id == feed_id && i.guid_or_id.as_deref() == Some(guid)) {
                    return Ok(Some(found.clone()));
                }
            }
            if let Some(link) = link {
                if let Some(found) = items.iter().find(|i| i.feed_id == feed_id && i.link.as_deref() == Some(link)) {
                    return Ok(Some(found.clone()));
                }
            }
            Ok(items.iter().find(|i| i.feed_id == feed_id && i.content_hash == content_hash).cloned())
        }

        async fn insert(
            &self,
            feed_id: Uuid,
            entry: &ParsedEntry,
            _sanitized_content: Option<&str>,
            _sanitized_summary: Option<&str>,
            is_date_estimated: bool,
            content_hash: &str,
        ) -> Result<Item, sqlx::Error> {
            let item = fake_item(Uuid::new_v4(), feed_id, entry.guid_or_id.as_deref(), entry.link.as_deref(), content_hash);
            let mut item = item;
            item.is_date_estimated = is_date_estimated;
            self.items.lock().unwrap().push(item.clone());
            Ok(item)
        }

        async fn update_content(
            &self,
            id: Uuid,
            entry: &ParsedEntry,
            _sanitized_content: Option<&str>,
            _sanitized_summary: Option<&str>,
            is_date_estimated: bool,
            content_hash: &str,
        ) -> Result<Item, sqlx::Error> {
            let mut items = self.items.lock().unwrap();
            let item = items.iter_mut().find(|i| i.id == id).unwrap();
            item.guid_or_id = entry.guid_or_id.clone();
            item.link = entry.link.clone();
            item.title = entry.title.clone();
            item.content_hash = content_hash.to_string();
            item.is_date_estimated = is_date_estimated;
            item.published_at = entry.published_at;
            Ok(item.clone())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, sqlx::Error> {
            Ok(self.items.lock().unwrap().iter().find(|i| i.id == id).cloned())
        }

        async fn due_for_hatebu_fetch(&self, _ttl: chrono::Duration, _limit: i64) -> Result<Vec<Item>, sqlx::Error> {
            Ok(Vec::new())
        }

        async fn set_hatebu_count(&self, _id: Uuid, _count: i32) -> Result<(), sqlx::Error> {
            Ok(())
        }

        async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
            Ok(0)
        }

        async fn list_page(
            &self,
            feed_id: Uuid,
            _user_id: Uuid,
            filter: ItemFilter,
            cursor: Option<DateTime<Utc>>,
            limit: i64,
        ) -> Result<Vec<ItemWithState>, sqlx::Error> {
            // No per-user state tracked in this fake: unread/starred filters
            // degrade to "everything"/"nothing", which is enough to satisfy
            // the trait for tests that don't exercise `ListItems` directly.
            let mut matched: Vec<Item> = self
                .items
                .lock()
                .unwrap()
                .iter()
                .filter(|i| i.feed_id == feed_id)
                .filter(|i| cursor.map_or(true, |c| i.published_at.map_or(false, |p| p < c)))
                .filter(|_| !matches!(filter, ItemFilter::Starred))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            matched.truncate(limit.max(0) as usize);
            Ok(matched
                .into_iter()
                .map(|item| ItemWithState { item, is_read: false, is_starred: false })
                .collect())
        }
    }

    fn entry(guid: Option<&str>, link: Option<&str>, title: &str) -> ParsedEntry {
        ParsedEntry {
            guid_or_id: guid.map(str::to_string),
            link: link.map(str::to_string),
            title: title.to_string(),
            content: None,
            summary: Some("summary".to_string()),
            author: None,
            published_at: None,
        }
    }

    #[test]
    fn content_hash_is_deterministic_and_sensitive_to_inputs() {
        let a = content_hash("Title", None, Some("summary"));
        let b = content_hash("Title", None, Some("summary"));
        let c = content_hash("Different", None, Some("summary"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn miss_inserts_new_row_with_estimated_date_when_no_timestamp() {
        let repo = FakeItemRepository::default();
        let feed_id = Uuid::new_v4();
        let entries = vec![(entry(Some("g1"), None, "Title"), None, Some("summary".to_string()))];

        let summary = upsert_entries(&repo, feed_id, &entries).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 1, updated: 0 });

        let stored = repo.items.lock().unwrap()[0].clone();
        assert!(stored.is_date_estimated);
    }

    #[tokio::test]
    async fn hit_on_guid_overwrites_title_and_increments_updated() {
        let repo = FakeItemRepository::default();
        let feed_id = Uuid::new_v4();
        let first = vec![(entry(Some("g1"), None, "Original"), None, Some("summary".to_string()))];
        upsert_entries(&repo, feed_id, &first).await.unwrap();

        let second = vec![(entry(Some("g1"), None, "Updated"), None, Some("summary".to_string()))];
        let summary = upsert_entries(&repo, feed_id, &second).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        let stored = repo.items.lock().unwrap()[0].clone();
        assert_eq!(stored.title, "Updated");
    }

    #[tokio::test]
    async fn link_fallback_matches_when_guid_absent() {
        let repo = FakeItemRepository::default();
        let feed_id = Uuid::new_v4();
        let first = vec![(entry(None, Some("https://x/1"), "Original"), None, Some("summary".to_string()))];
        upsert_entries(&repo, feed_id, &first).await.unwrap();

        let second = vec![(entry(None, Some("https://x/1"), "Updated"), None, Some("summary".to_string()))];
        let summary = upsert_entries(&repo, feed_id, &second).await.unwrap();
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn upsert_by_link_after_guid_drop_converges_guid_and_link() {
        let repo = FakeItemRepository::default();
        let feed_id = Uuid::new_v4();
        let first = vec![(entry(Some("g1"), Some("https://x/1"), "Original"), None, Some("summary".to_string()))];
        upsert_entries(&repo, feed_id, &first).await.unwrap();

        // Second fetch drops the GUID entirely but keeps the same link.
        let second = vec![(entry(None, Some("https://x/1"), "Updated"), None, Some("summary".to_string()))];
        let summary = upsert_entries(&repo, feed_id, &second).await.unwrap();
        assert_eq!(summary, UpsertSummary { inserted: 0, updated: 1 });

        let stored = repo.items.lock().unwrap()[0].clone();
        assert_eq!(stored.title, "Updated");
        assert_eq!(stored.guid_or_id, None);
        assert_eq!(stored.link.as_deref(), Some("https://x/1"));
    }

    #[test]
    fn content_hash_ignores_sub_second_precision() {
        let t1 = "2024-01-01T00:00:00.100Z".parse::<DateTime<Utc>>().unwrap();
        let t2 = "2024-01-01T00:00:00.900Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            content_hash("Title", Some(t1), Some("summary")),
            content_hash("Title", Some(t2), Some("summary")),
        );
    }

    #[test]
    fn build_page_detects_has_more_via_limit_plus_one_fetch() {
        let items: Vec<ItemWithState> = (0..6)
            .map(|_| ItemWithState {
                item: fake_item(Uuid::new_v4(), Uuid::new_v4(), None, None, "h"),
                is_read: false,
                is_starred: false,
            })
            .collect();
        let page = build_page(items, 5);
        assert_eq!(page.items.len(), 5);
        assert!(page.has_more);
    }
}
