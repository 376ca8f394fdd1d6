pub mod bookmark_job_state;
pub mod feeds;
pub mod item_states;
pub mod items;
pub mod subscriptions;
pub mod traits;
pub mod users;

pub use bookmark_job_state::PgBookmarkJobStateRepository;
pub use feeds::PgFeedRepository;
pub use item_states::PgItemStateRepository;
pub use items::PgItemRepository;
pub use subscriptions::PgSubscriptionRepository;
pub use traits::{
    BookmarkJobStateRepository, FeedRepository, ItemRepository, ItemStateRepository,
    SubscriptionCreateError, SubscriptionRepository, UserRepository,
};
pub use users::PgUserRepository;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ParsedEntry;
    use chrono::Utc;

    async fn seed_feed(pool: &sqlx::PgPool) -> uuid::Uuid {
        let repo = PgFeedRepository::new(pool.clone());
        let feed = repo.upsert_by_url("https://example.com/feed", "Example").await.unwrap();
        feed.id
    }

    async fn seed_user(pool: &sqlx::PgPool) -> uuid::Uuid {
        let row: (uuid::Uuid,) = sqlx::query_as(
            "INSERT INTO users (email, display_name) VALUES ($1, $2) RETURNING id",
        )
        .bind("user@example.com")
        .bind("User")
        .fetch_one(pool)
        .await
        .unwrap();
        row.0
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn upsert_by_url_is_idempotent(pool: sqlx::PgPool) {
        let repo = PgFeedRepository::new(pool.clone());
        let a = repo.upsert_by_url("https://example.com/feed", "A").await.unwrap();
        let b = repo.upsert_by_url("https://example.com/feed", "B").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn claim_due_for_fetch_only_returns_active_overdue_feeds_with_a_subscriber(pool: sqlx::PgPool) {
        let feed_id = seed_feed(&pool).await;
        let feeds_repo = PgFeedRepository::new(pool.clone());

        // No subscriber yet — a feed nobody reads is never claimed.
        assert!(feeds_repo.claim_due_for_fetch(10).await.unwrap().is_empty());

        let user_id = seed_user(&pool).await;
        let sub_repo = PgSubscriptionRepository::new(pool.clone());
        sub_repo.create_checking_cap(user_id, feed_id, 100).await.unwrap();

        let claimed = feeds_repo.claim_due_for_fetch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, feed_id);

        feeds_repo
            .set_status(feed_id, crate::domain::models::FetchStatus::Stopped)
            .await
            .unwrap();
        let claimed = feeds_repo.claim_due_for_fetch(10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn subscription_cap_blocks_the_101st_subscription(pool: sqlx::PgPool) {
        let user_id = seed_user(&pool).await;
        let sub_repo = PgSubscriptionRepository::new(pool.clone());
        let feed_repo = PgFeedRepository::new(pool.clone());

        for n in 0..3 {
            let feed = feed_repo
                .upsert_by_url(&format!("https://example.com/feed-{n}"), "F")
                .await
                .unwrap();
            sub_repo.create_checking_cap(user_id, feed.id, 3).await.unwrap();
        }

        let overflow_feed = feed_repo.upsert_by_url("https://example.com/feed-overflow", "F").await.unwrap();
        let result = sub_repo.create_checking_cap(user_id, overflow_feed.id, 3).await;
        assert!(matches!(result, Err(SubscriptionCreateError::CapReached)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn item_identity_prefers_guid_over_link_over_hash(pool: sqlx::PgPool) {
        let feed_id = seed_feed(&pool).await;
        let items = PgItemRepository::new(pool.clone());

        let entry = ParsedEntry {
            guid_or_id: Some("guid-1".to_string()),
            link: Some("https://example.com/a".to_string()),
            title: "Title".to_string(),
            content: None,
            summary: Some("summary".to_string()),
            author: None,
            published_at: Some(Utc::now()),
        };
        let inserted = items
            .insert(feed_id, &entry, None, Some("summary"), false, "hash-1")
            .await
            .unwrap();

        // Same guid, different link/hash — still resolves to the same row.
        let found = items
            .find_existing(feed_id, Some("guid-1"), Some("https://example.com/b"), "hash-2")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, inserted.id);

        // No guid match, but link matches.
        let found = items
            .find_existing(feed_id, Some("guid-other"), Some("https://example.com/a"), "hash-2")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, inserted.id);

        // Neither guid nor link match, but hash does.
        let found = items
            .find_existing(feed_id, Some("guid-other"), Some("https://example.com/other"), "hash-1")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, inserted.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn item_state_defaults_to_unread_and_unstarred(pool: sqlx::PgPool) {
        let feed_id = seed_feed(&pool).await;
        let user_id = seed_user(&pool).await;
        let items = PgItemRepository::new(pool.clone());
        let states = PgItemStateRepository::new(pool.clone());

        let entry = ParsedEntry {
            guid_or_id: Some("guid-1".to_string()),
            link: None,
            title: "Title".to_string(),
            content: None,
            summary: None,
            author: None,
            published_at: None,
        };
        let item = items.insert(feed_id, &entry, None, None, false, "hash-1").await.unwrap();

        assert!(states.get(user_id, item.id).await.unwrap().is_none());

        states.set_read(user_id, item.id, true).await.unwrap();
        let state = states.get(user_id, item.id).await.unwrap().unwrap();
        assert!(state.is_read);
        assert!(!state.is_starred);
        assert!(state.read_at.is_some());
    }
}
