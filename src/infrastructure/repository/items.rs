use super::traits::ItemRepository;
use crate::domain::models::{Item, ItemFilter, ItemWithState, ParsedEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ItemWithStateRow {
    id: Uuid,
    feed_id: Uuid,
    guid_or_id: Option<String>,
    link: Option<String>,
    title: String,
    content: Option<String>,
    summary: Option<String>,
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
    is_date_estimated: bool,
    fetched_at: DateTime<Utc>,
    content_hash: String,
    hatebu_count: Option<i32>,
    hatebu_fetched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_read: bool,
    is_starred: bool,
}

impl From<ItemWithStateRow> for ItemWithState {
    fn from(r: ItemWithStateRow) -> Self {
        ItemWithState {
            item: Item {
                id: r.id,
                feed_id: r.feed_id,
                guid_or_id: r.guid_or_id,
                link: r.link,
                title: r.title,
                content: r.content,
                summary: r.summary,
                author: r.author,
                published_at: r.published_at,
                is_date_estimated: r.is_date_estimated,
                fetched_at: r.fetched_at,
                content_hash: r.content_hash,
                hatebu_count: r.hatebu_count,
                hatebu_fetched_at: r.hatebu_fetched_at,
                created_at: r.created_at,
                updated_at: r.updated_at,
            },
            is_read: r.is_read,
            is_starred: r.is_starred,
        }
    }
}

pub struct PgItemRepository {
    pool: PgPool,
}

impl PgItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRepository for PgItemRepository {
    /// Identity priority chain: guid, then link, then content hash — each
    /// scoped to the feed, since identity never crosses feeds.
    async fn find_existing(
        &self,
        feed_id: Uuid,
        guid_or_id: Option<&str>,
        link: Option<&str>,
        content_hash: &str,
    ) -> Result<Option<Item>, sqlx::Error> {
        if let Some(guid) = guid_or_id {
            let found = sqlx::query_as::<_, Item>(
                "SELECT * FROM items WHERE feed_id = $1 AND guid_or_id = $2",
            )
            .bind(feed_id)
            .bind(guid)
            .fetch_optional(&self.pool)
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        if let Some(link) = link {
            let found = sqlx::query_as::<_, Item>(
                "SELECT * FROM items WHERE feed_id = $1 AND link = $2",
            )
            .bind(feed_id)
            .bind(link)
            .fetch_optional(&self.pool)
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }

        sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE feed_id = $1 AND content_hash = $2",
        )
        .bind(feed_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert(
        &self,
        feed_id: Uuid,
        entry: &ParsedEntry,
        sanitized_content: Option<&str>,
        sanitized_summary: Option<&str>,
        is_date_estimated: bool,
        content_hash: &str,
    ) -> Result<Item, sqlx::Error> {
        sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items
                (feed_id, guid_or_id, link, title, content, summary, author,
                 published_at, is_date_estimated, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(feed_id)
        .bind(&entry.guid_or_id)
        .bind(&entry.link)
        .bind(&entry.title)
        .bind(sanitized_content)
        .bind(sanitized_summary)
        .bind(&entry.author)
        .bind(entry.published_at)
        .bind(is_date_estimated)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_content(
        &self,
        id: Uuid,
        entry: &ParsedEntry,
        sanitized_content: Option<&str>,
        sanitized_summary: Option<&str>,
        is_date_estimated: bool,
        content_hash: &str,
    ) -> Result<Item, sqlx::Error> {
        sqlx::query_as::<_, Item>(
            r#"
            UPDATE items
            SET guid_or_id = $1, link = $2, title = $3, content = $4, summary = $5,
                author = $6, published_at = $7, is_date_estimated = $8, content_hash = $9,
                fetched_at = now(), updated_at = now()
            WHERE id = $10
            RETURNING *
            "#,
        )
        .bind(&entry.guid_or_id)
        .bind(&entry.link)
        .bind(&entry.title)
        .bind(sanitized_content)
        .bind(sanitized_summary)
        .bind(&entry.author)
        .bind(entry.published_at)
        .bind(is_date_estimated)
        .bind(content_hash)
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Item>, sqlx::Error> {
        sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Bookmark job candidate pool: items never fetched, or last fetched more than
    /// `ttl` ago; nulls first, then oldest.
    async fn due_for_hatebu_fetch(
        &self,
        ttl: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Item>, sqlx::Error> {
        let cutoff: DateTime<Utc> = Utc::now() - ttl;
        sqlx::query_as::<_, Item>(
            r#"
            SELECT * FROM items
            WHERE hatebu_fetched_at IS NULL OR hatebu_fetched_at <= $1
            ORDER BY (hatebu_fetched_at IS NULL) DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn set_hatebu_count(&self, id: Uuid, count: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE items SET hatebu_count = $1, hatebu_fetched_at = now(), updated_at = now() WHERE id = $2",
        )
        .bind(count)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk delete past the retention horizon.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM items WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// `ListItems`: descending `published_at`, scoped to one feed, joined
    /// against this user's per-item state for the read/starred filter and
    /// for reporting `is_read`/`is_starred` on each row. `limit` should be
    /// requested as the caller's page size plus one, so the caller can
    /// detect `has_more`.
    async fn list_page(
        &self,
        feed_id: Uuid,
        user_id: Uuid,
        filter: ItemFilter,
        cursor: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ItemWithState>, sqlx::Error> {
        let filter_str = match filter {
            ItemFilter::All => "all",
            ItemFilter::Unread => "unread",
            ItemFilter::Starred => "starred",
        };

        let rows = sqlx::query_as::<_, ItemWithStateRow>(
            r#"
            SELECT
                items.id, items.feed_id, items.guid_or_id, items.link, items.title,
                items.content, items.summary, items.author, items.published_at,
                items.is_date_estimated, items.fetched_at, items.content_hash,
                items.hatebu_count, items.hatebu_fetched_at, items.created_at, items.updated_at,
                COALESCE(item_states.is_read, false) AS is_read,
                COALESCE(item_states.is_starred, false) AS is_starred
            FROM items
            LEFT JOIN item_states
                ON item_states.item_id = items.id AND item_states.user_id = $1
            WHERE items.feed_id = $2
              AND ($3::timestamptz IS NULL OR items.published_at < $3)
              AND (
                    $4 = 'all'
                    OR ($4 = 'unread' AND COALESCE(item_states.is_read, false) = false)
                    OR ($4 = 'starred' AND COALESCE(item_states.is_starred, false) = true)
                  )
            ORDER BY items.published_at DESC
            LIMIT $5
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(cursor)
        .bind(filter_str)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemWithState::from).collect())
    }
}
