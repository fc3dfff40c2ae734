//! Bounded list cache
//!
//! Keeps each cached list a newest-first prefix of the owner's sequence in
//! the store, at most `list_limit` items long:
//! - reads load the whole list; a missing key is rebuilt from the store
//! - new items are pushed only onto lists that already exist
//! - concurrent rebuilds of the same key are allowed, the last one wins
//!
//! Items are stored as JSON strings.

use crate::error::{AppError, Result};
use crate::models::Timestamped;
use feed_cache::CacheBackend;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BoundedListCache {
    backend: Arc<dyn CacheBackend>,
    list_limit: usize,
    ttl_secs: u64,
}

impl BoundedListCache {
    pub fn new(backend: Arc<dyn CacheBackend>, list_limit: usize, ttl_secs: u64) -> Self {
        Self {
            backend,
            list_limit,
            ttl_secs,
        }
    }

    pub fn list_limit(&self) -> usize {
        self.list_limit
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Full cached list for `key`, rebuilding it with `loader` on a miss.
    ///
    /// `loader` receives the list limit and must return items newest-first.
    /// Cache read failures are returned as `AppError::Cache` so the caller
    /// can bypass the cache; failures to write the rebuilt list are only
    /// logged.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, loader: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Timestamped,
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if let Some(raw) = self.backend.read_list(key).await? {
            match decode_items::<T>(&raw) {
                Ok(mut items) => {
                    // Concurrent batches may push out of created_at order
                    items.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
                    return Ok(items);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Undecodable cache list, rebuilding");
                    if let Err(e) = self.backend.remove(key).await {
                        warn!(key = %key, error = %e, "Failed to drop undecodable list");
                    }
                }
            }
        }

        let mut items = loader(self.list_limit).await?;
        items.truncate(self.list_limit);

        match encode_items(&items) {
            Ok(encoded) => {
                if let Err(e) = self
                    .backend
                    .replace_list(key, &encoded, self.ttl_secs)
                    .await
                {
                    warn!(key = %key, error = %e, "Failed to store rebuilt list");
                } else {
                    debug!(key = %key, len = items.len(), "Cache list rebuilt");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode list for cache"),
        }

        Ok(items)
    }

    /// Push `item` onto an existing list and trim it to the limit.
    ///
    /// Returns `false` when the list does not exist; it is then left for the
    /// next read to rebuild. An item older than the tail of a full list is
    /// outside the cached prefix and is not pushed either.
    pub async fn mirror_new_entry<T>(&self, key: &str, item: &T) -> Result<bool>
    where
        T: Serialize + DeserializeOwned + Timestamped,
    {
        match self.backend.list_tail(key).await? {
            None => return Ok(false),
            Some((len, tail)) if len >= self.list_limit => {
                match serde_json::from_str::<T>(&tail) {
                    Ok(tail) if item.created_at() < tail.created_at() => {
                        debug!(key = %key, "Pushed item older than full list, skipped");
                        return Ok(false);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(key = %key, error = %e, "Undecodable list tail, dropping list");
                        self.backend.remove(key).await?;
                        return Ok(false);
                    }
                }
            }
            Some(_) => {}
        }

        let encoded = serde_json::to_string(item)?;
        let applied = self
            .backend
            .push_front_bounded(key, &encoded, self.list_limit)
            .await?;
        Ok(applied)
    }

    pub async fn invalidate(&self, keys: &[String]) -> Result<()> {
        self.backend.remove_many(keys).await.map_err(AppError::from)
    }
}

fn decode_items<T: DeserializeOwned>(raw: &[String]) -> serde_json::Result<Vec<T>> {
    raw.iter().map(|item| serde_json::from_str(item)).collect()
}

fn encode_items<T: Serialize>(items: &[T]) -> serde_json::Result<Vec<String>> {
    items.iter().map(serde_json::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedEntry;
    use chrono::{Duration, TimeZone, Utc};
    use feed_cache::MemoryCacheBackend;
    use uuid::Uuid;

    fn entry(viewer: Uuid, secs: i64) -> FeedEntry {
        FeedEntry {
            id: Uuid::new_v4(),
            viewer_id: viewer,
            post_id: Uuid::new_v4(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs),
        }
    }

    fn cache(limit: usize) -> (Arc<MemoryCacheBackend>, BoundedListCache) {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = BoundedListCache::new(backend.clone(), limit, 60);
        (backend, cache)
    }

    #[tokio::test]
    async fn test_load_truncates_to_limit() {
        let (backend, cache) = cache(3);
        let viewer = Uuid::new_v4();
        let rows: Vec<FeedEntry> = (0..5).rev().map(|s| entry(viewer, s)).collect();

        let loaded = cache
            .get_or_load("v1:feed:x", |limit| {
                let rows = rows.clone();
                async move {
                    assert_eq!(limit, 3);
                    Ok(rows)
                }
            })
            .await
            .unwrap();

        assert_eq!(loaded, rows[..3].to_vec());
        assert_eq!(backend.len("v1:feed:x"), 3);
    }

    #[tokio::test]
    async fn test_hit_does_not_call_loader_and_sorts() {
        let (backend, cache) = cache(10);
        let viewer = Uuid::new_v4();
        let older = entry(viewer, 1);
        let newer = entry(viewer, 2);
        // stored out of order, as concurrent pushes can leave it
        backend
            .replace_list(
                "v1:feed:x",
                &encode_items(&[older.clone(), newer.clone()]).unwrap(),
                60,
            )
            .await
            .unwrap();

        let items: Vec<FeedEntry> = cache
            .get_or_load("v1:feed:x", |_| async {
                Err(AppError::Internal("loader must not run on a hit".into()))
            })
            .await
            .unwrap();

        assert_eq!(items, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_undecodable_list_is_rebuilt() {
        let (backend, cache) = cache(10);
        let viewer = Uuid::new_v4();
        backend
            .replace_list("v1:feed:x", &["not json".to_string()], 60)
            .await
            .unwrap();

        let fresh = entry(viewer, 0);
        let expected = fresh.clone();
        let items: Vec<FeedEntry> = cache
            .get_or_load("v1:feed:x", |_| async move { Ok(vec![fresh]) })
            .await
            .unwrap();

        assert_eq!(items, vec![expected]);
        assert_eq!(backend.len("v1:feed:x"), 1);
    }

    #[tokio::test]
    async fn test_mirror_skips_missing_list() {
        let (backend, cache) = cache(10);
        let applied = cache
            .mirror_new_entry("v1:feed:x", &entry(Uuid::new_v4(), 0))
            .await
            .unwrap();

        assert!(!applied);
        assert!(!backend.contains_key("v1:feed:x"));
    }

    #[tokio::test]
    async fn test_late_push_keeps_full_list_contiguous() {
        let (backend, cache) = cache(3);
        let viewer = Uuid::new_v4();
        let rows: Vec<FeedEntry> = [10, 8, 6].iter().map(|s| entry(viewer, *s)).collect();
        backend
            .replace_list("v1:feed:x", &encode_items(&rows).unwrap(), 60)
            .await
            .unwrap();

        // Older than everything kept: pushing would evict entry 6 for it
        let late = entry(viewer, 5);
        assert!(!cache.mirror_new_entry("v1:feed:x", &late).await.unwrap());

        // Falls inside the kept range: pushed, tail trimmed
        let between = entry(viewer, 7);
        assert!(cache.mirror_new_entry("v1:feed:x", &between).await.unwrap());

        let items: Vec<FeedEntry> = cache
            .get_or_load("v1:feed:x", |_| async {
                Err(AppError::Internal("loader must not run on a hit".into()))
            })
            .await
            .unwrap();
        assert_eq!(items, vec![rows[0].clone(), rows[1].clone(), between]);
    }

    #[tokio::test]
    async fn test_late_push_onto_short_list_is_kept() {
        let (backend, cache) = cache(3);
        let viewer = Uuid::new_v4();
        let newest = entry(viewer, 10);
        backend
            .replace_list("v1:feed:x", &encode_items(&[newest.clone()]).unwrap(), 60)
            .await
            .unwrap();

        let late = entry(viewer, 5);
        assert!(cache.mirror_new_entry("v1:feed:x", &late).await.unwrap());

        let items: Vec<FeedEntry> = cache
            .get_or_load("v1:feed:x", |_| async { Ok(vec![]) })
            .await
            .unwrap();
        assert_eq!(items, vec![newest, late]);
    }

    #[tokio::test]
    async fn test_read_error_is_surfaced() {
        let (backend, cache) = cache(10);
        backend.set_unavailable(true);

        let result: Result<Vec<FeedEntry>> =
            cache.get_or_load("v1:feed:x", |_| async { Ok(vec![]) }).await;

        assert!(matches!(result, Err(AppError::Cache(_))));
    }
}
