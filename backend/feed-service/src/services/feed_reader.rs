/// Cached newsfeed reader
///
/// Reads go to the viewer's bounded cache list first and fall back to the
/// feed store when the list cannot answer the cursor.
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::cache::BoundedListCache;
use crate::db::{FeedQuery, FeedStore};
use crate::error::Result;
use crate::models::FeedEntry;
use crate::pagination::{FeedCursor, Page};
use feed_cache::CacheKey;

use super::serve_page;

#[derive(Clone)]
pub struct NewsFeedService {
    store: Arc<dyn FeedStore>,
    cache: BoundedListCache,
    page_size: usize,
}

impl NewsFeedService {
    pub fn new(store: Arc<dyn FeedStore>, cache: BoundedListCache, page_size: usize) -> Self {
        Self {
            store,
            cache,
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The viewer's cached feed, newest first, rebuilt from the store on a miss.
    pub async fn get_cached_newsfeeds(&self, viewer_id: Uuid) -> Result<Vec<FeedEntry>> {
        let key = CacheKey::user_feed(viewer_id);
        let store = self.store.clone();
        self.cache
            .get_or_load(&key, move |limit| async move {
                store
                    .query_feed_entries(viewer_id, FeedQuery::newest(limit))
                    .await
            })
            .await
    }

    pub async fn get_feed_page(&self, viewer_id: Uuid, cursor: FeedCursor) -> Result<Page<FeedEntry>> {
        let page_size = self.page_size;
        serve_page(
            "newsfeed",
            &self.cache,
            cursor,
            page_size,
            || self.get_cached_newsfeeds(viewer_id),
            || {
                self.store
                    .query_feed_entries(viewer_id, FeedQuery::for_page(cursor, page_size))
            },
        )
        .await
    }

    /// Mirror a freshly stored entry into its viewer's list.
    ///
    /// Returns whether the list existed. A missing list is left alone.
    pub async fn push_newsfeed_to_cache(&self, entry: &FeedEntry) -> Result<bool> {
        let key = CacheKey::user_feed(entry.viewer_id);
        self.cache.mirror_new_entry(&key, entry).await
    }

    /// Drop the cached lists of `viewers`; the next read rebuilds them.
    pub async fn invalidate_users(&self, viewers: &[Uuid]) -> Result<()> {
        if viewers.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = viewers.iter().copied().map(CacheKey::user_feed).collect();
        self.cache.invalidate(&keys).await.map_err(|e| {
            warn!(count = viewers.len(), error = %e, "Failed to invalidate feed lists");
            e
        })
    }
}
