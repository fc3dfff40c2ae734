/// Cached list of the posts each user authored
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::BoundedListCache;
use crate::db::{FeedQuery, PostStore};
use crate::error::Result;
use crate::models::{truncate_to_micros, PostRef};
use crate::pagination::{FeedCursor, Page};
use feed_cache::CacheKey;

use super::serve_page;

#[derive(Clone)]
pub struct TimelineService {
    posts: Arc<dyn PostStore>,
    cache: BoundedListCache,
    page_size: usize,
}

impl TimelineService {
    pub fn new(posts: Arc<dyn PostStore>, cache: BoundedListCache, page_size: usize) -> Self {
        Self {
            posts,
            cache,
            page_size,
        }
    }

    pub async fn get_cached_user_posts(&self, author_id: Uuid) -> Result<Vec<PostRef>> {
        let key = CacheKey::user_posts(author_id);
        let posts = self.posts.clone();
        self.cache
            .get_or_load(&key, move |limit| async move {
                posts
                    .query_user_posts(author_id, FeedQuery::newest(limit))
                    .await
            })
            .await
    }

    pub async fn get_user_posts_page(
        &self,
        author_id: Uuid,
        cursor: FeedCursor,
    ) -> Result<Page<PostRef>> {
        let page_size = self.page_size;
        serve_page(
            "user_posts",
            &self.cache,
            cursor,
            page_size,
            || self.get_cached_user_posts(author_id),
            || {
                self.posts
                    .query_user_posts(author_id, FeedQuery::for_page(cursor, page_size))
            },
        )
        .await
    }

    /// Push a new post onto its author's list if the list is cached.
    ///
    /// The cached copy carries the store's microsecond precision so cursors
    /// built from it compare equal to the item.
    pub async fn push_post_to_cache(&self, post: &PostRef) -> Result<bool> {
        let key = CacheKey::user_posts(post.author_id);
        let stored = PostRef {
            created_at: truncate_to_micros(post.created_at),
            ..post.clone()
        };
        self.cache.mirror_new_entry(&key, &stored).await
    }

    pub async fn invalidate(&self, author_id: Uuid) -> Result<()> {
        self.cache
            .invalidate(&[CacheKey::user_posts(author_id)])
            .await
    }
}
