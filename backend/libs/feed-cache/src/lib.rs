//! Bounded newsfeed cache
//!
//! Keyed list and counter store used by the feed-service read path:
//! - Per-user newest-first lists capped at a configured length
//! - Atomic push-if-exists + trim (a push never creates a list)
//! - Atomic replace-with-expiry for lazy (re)loads, last writer wins
//! - Counters with atomic increment-if-present for lazy back-fill
//!
//! The Redis implementation holds one long-lived `ConnectionManager`
//! acquired at process start and cloned per command.

mod error;
mod keys;
mod metrics;
mod redis_backend;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, CACHE_VERSION};
pub use metrics::CacheMetrics;
pub use redis_backend::RedisCacheBackend;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryCacheBackend;

/// Default TTL values (seconds)
pub mod ttl {
    pub const FEED_LIST: u64 = 3 * 24 * 60 * 60; // 3 days
    pub const USER_POSTS: u64 = 3 * 24 * 60 * 60; // 3 days
    pub const COUNTER: u64 = 7 * 24 * 60 * 60; // 7 days
}

/// Operations the feed-service needs from its cache.
///
/// Lists are stored newest-first. A list key that holds no items does not
/// exist, so `read_list` returning `None` is the only miss signal.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Full contents of a list, or `None` when the key does not exist.
    async fn read_list(&self, key: &str) -> CacheResult<Option<Vec<String>>>;

    /// Atomically replace a list and set its TTL.
    ///
    /// `items` are newest-first. Empty `items` leave the key absent.
    async fn replace_list(&self, key: &str, items: &[String], ttl_secs: u64) -> CacheResult<()>;

    /// Length and last (oldest) item of a list, or `None` when absent.
    async fn list_tail(&self, key: &str) -> CacheResult<Option<(usize, String)>>;

    /// Push `item` to the front of an existing list, then trim it to `limit`.
    ///
    /// Returns `false` without writing anything when the key is absent.
    async fn push_front_bounded(&self, key: &str, item: &str, limit: usize) -> CacheResult<bool>;

    /// Delete a key.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Delete several keys in one round trip.
    async fn remove_many(&self, keys: &[String]) -> CacheResult<()>;

    /// Read a counter.
    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>>;

    /// Overwrite a counter and set its TTL.
    async fn set_counter(&self, key: &str, value: i64, ttl_secs: u64) -> CacheResult<()>;

    /// Add `delta` to a counter only if it exists; returns the new value.
    async fn incr_if_exists(&self, key: &str, delta: i64) -> CacheResult<Option<i64>>;

    /// Connection health check.
    async fn ping(&self) -> CacheResult<()>;
}

/// Add jitter to TTL to prevent thundering herd
pub(crate) fn add_jitter(ttl_secs: u64) -> u64 {
    let jitter_percent = (rand::random::<u32>() % 10) as f64 / 100.0;
    let jitter = (ttl_secs as f64 * jitter_percent).round() as u64;
    ttl_secs + jitter
}
