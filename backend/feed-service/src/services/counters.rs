//! Like and comment counters
//!
//! The posts table is authoritative and is updated by the caller before
//! `incr`/`decr` runs. A missing counter key is back-filled from that row
//! rather than incremented, so the delta is never applied twice.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::PostStore;
use crate::error::Result;
use crate::models::PostCounts;
use feed_cache::{CacheBackend, CacheKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Likes,
    Comments,
}

impl CounterKind {
    pub fn attr(&self) -> &'static str {
        match self {
            CounterKind::Likes => "likes_count",
            CounterKind::Comments => "comments_count",
        }
    }

    fn read(&self, counts: &PostCounts) -> i64 {
        match self {
            CounterKind::Likes => counts.likes_count,
            CounterKind::Comments => counts.comments_count,
        }
    }
}

#[derive(Clone)]
pub struct PostCounterService {
    posts: Arc<dyn PostStore>,
    cache: Arc<dyn CacheBackend>,
    ttl_secs: u64,
}

impl PostCounterService {
    pub fn new(posts: Arc<dyn PostStore>, cache: Arc<dyn CacheBackend>) -> Self {
        Self::with_ttl(posts, cache, feed_cache::ttl::COUNTER)
    }

    pub fn with_ttl(posts: Arc<dyn PostStore>, cache: Arc<dyn CacheBackend>, ttl_secs: u64) -> Self {
        Self {
            posts,
            cache,
            ttl_secs,
        }
    }

    pub async fn incr(&self, post_id: Uuid, kind: CounterKind) -> Result<i64> {
        self.apply(post_id, kind, 1).await
    }

    pub async fn decr(&self, post_id: Uuid, kind: CounterKind) -> Result<i64> {
        self.apply(post_id, kind, -1).await
    }

    /// Current value, back-filling the cache on a miss.
    pub async fn get(&self, post_id: Uuid, kind: CounterKind) -> Result<i64> {
        let key = CacheKey::counter("post", kind.attr(), post_id);
        match self.cache.get_counter(&key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Counter read failed, using store value");
                return self.load(post_id, kind).await;
            }
        }
        self.backfill(&key, post_id, kind).await
    }

    async fn apply(&self, post_id: Uuid, kind: CounterKind, delta: i64) -> Result<i64> {
        let key = CacheKey::counter("post", kind.attr(), post_id);
        match self.cache.incr_if_exists(&key, delta).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => self.backfill(&key, post_id, kind).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter update failed, dropping key");
                // A stale counter must not survive a missed delta
                if let Err(e) = self.cache.remove(&key).await {
                    warn!(key = %key, error = %e, "Failed to drop counter");
                }
                self.load(post_id, kind).await
            }
        }
    }

    async fn backfill(&self, key: &str, post_id: Uuid, kind: CounterKind) -> Result<i64> {
        let value = self.load(post_id, kind).await?;
        if let Err(e) = self.cache.set_counter(key, value, self.ttl_secs).await {
            warn!(key = %key, error = %e, "Counter back-fill failed");
        } else {
            debug!(key = %key, value, "Counter back-filled");
        }
        Ok(value)
    }

    async fn load(&self, post_id: Uuid, kind: CounterKind) -> Result<i64> {
        let counts = self.posts.load_post_counts(post_id).await?;
        Ok(counts.map(|c| kind.read(&c)).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_attrs() {
        assert_eq!(CounterKind::Likes.attr(), "likes_count");
        assert_eq!(CounterKind::Comments.attr(), "comments_count");
        assert_eq!(
            CacheKey::counter("post", CounterKind::Likes.attr(), Uuid::nil()),
            "v1:count:post:likes_count:00000000-0000-0000-0000-000000000000"
        );
    }
}
