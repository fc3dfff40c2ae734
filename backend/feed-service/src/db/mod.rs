/// Content Store and Social Graph adapters
///
/// The core only talks to these traits. The `Pg*` implementations are the
/// production adapters; tests provide in-memory ones.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{FeedEntry, NewFeedEntry, PostCounts, PostRef};

pub mod feed_repo;
pub mod graph_repo;
pub mod post_repo;

pub use feed_repo::PgFeedStore;
pub use graph_repo::PgSocialGraph;
pub use post_repo::PgPostStore;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Time-bounded, newest-first query over one owner's sequence.
///
/// `before` and `after` are exclusive bounds. `limit: None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl FeedQuery {
    pub fn newest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Authoritative store of feed entries
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert one entry. On a (viewer, post) conflict the existing row is
    /// returned unchanged.
    async fn create_feed_entry(&self, entry: NewFeedEntry) -> Result<FeedEntry>;

    /// Insert many entries in a single statement. Returns only the rows that
    /// did not exist before.
    async fn bulk_create_feed_entries(&self, entries: &[NewFeedEntry]) -> Result<Vec<FeedEntry>>;

    /// Entries of `viewer_id`, newest first.
    async fn query_feed_entries(&self, viewer_id: Uuid, query: FeedQuery)
        -> Result<Vec<FeedEntry>>;

    /// Remove every entry for a post; returns the affected viewers.
    async fn delete_feed_entries_for_post(&self, post_id: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn get_follower_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Read access to posts owned by the content service
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Posts written by `author_id`, newest first.
    async fn query_user_posts(&self, author_id: Uuid, query: FeedQuery) -> Result<Vec<PostRef>>;

    /// Authoritative engagement counters, `None` when the post is gone.
    async fn load_post_counts(&self, post_id: Uuid) -> Result<Option<PostCounts>>;
}

/// Create the shared connection pool and apply migrations when enabled.
pub async fn init_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    if config.run_migrations {
        MIGRATOR.run(&pool).await?;
        info!("Database migrations completed successfully");
    }

    Ok(pool)
}
