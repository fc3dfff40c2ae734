//! Cache key schema
//!
//! Keys are namespaced per purpose and per owner.
//! Key format: v{VERSION}:{purpose}:{identifier}[:sub_key]

use uuid::Uuid;

/// Cache schema version - increment when changing key formats or the
/// serialized shape of list items
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Newest-first feed list of a viewer
    /// Format: v1:feed:{user_id}
    pub fn user_feed(user_id: Uuid) -> String {
        format!("v{}:feed:{}", CACHE_VERSION, user_id)
    }

    /// Newest-first list of the posts a user authored
    /// Format: v1:posts:user:{user_id}
    pub fn user_posts(user_id: Uuid) -> String {
        format!("v{}:posts:user:{}", CACHE_VERSION, user_id)
    }

    /// Counter attached to an entity row
    /// Format: v1:count:{entity}:{attr}:{id}
    pub fn counter(entity: &str, attr: &str, id: Uuid) -> String {
        format!("v{}:count:{}:{}:{}", CACHE_VERSION, entity, attr, id)
    }

    /// Extract the purpose segment from a key
    pub fn entity_type(key: &str) -> Option<&str> {
        let mut parts = key.split(':');
        match (parts.next(), parts.next()) {
            (Some(_), Some(entity)) if !entity.is_empty() => Some(entity),
            _ => None,
        }
    }
}
