use crate::{add_jitter, CacheBackend, CacheError, CacheMetrics, CacheResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

/// Increment only when the counter is present, so that a cold key is
/// back-filled from the source of truth instead of starting at the delta.
const INCR_IF_EXISTS_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
"#;

/// Redis-backed cache shared by every request and worker of the process
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    incr_if_exists: Script,
    metrics: CacheMetrics,
}

impl RedisCacheBackend {
    /// Open the process-wide connection. Call once at startup.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn))
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            incr_if_exists: Script::new(INCR_IF_EXISTS_LUA),
            metrics: CacheMetrics::new(),
        }
    }

    fn record_redis_error(&self, key: &str, op: &str, e: &redis::RedisError) {
        warn!(key = %key, op = op, error = %e, "Redis command failed");
        self.metrics.record_error(key, "redis");
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn read_list(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn.lrange(key, 0, -1).await.map_err(|e| {
            self.record_redis_error(key, "LRANGE", &e);
            CacheError::Redis(e)
        })?;

        // Redis never stores an empty list, so an empty reply is a miss
        if items.is_empty() {
            debug!(key = %key, "Cache miss");
            self.metrics.record_miss(key);
            Ok(None)
        } else {
            debug!(key = %key, len = items.len(), "Cache hit");
            self.metrics.record_hit(key);
            Ok(Some(items))
        }
    }

    async fn replace_list(&self, key: &str, items: &[String], ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !items.is_empty() {
            let ttl_with_jitter = add_jitter(ttl_secs);
            pipe.rpush(key, items)
                .ignore()
                .expire(key, ttl_with_jitter as i64)
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            self.record_redis_error(key, "MULTI", &e);
            CacheError::Redis(e)
        })?;

        debug!(key = %key, len = items.len(), "Cache list replaced");
        self.metrics.record_write(key);
        Ok(())
    }

    async fn list_tail(&self, key: &str) -> CacheResult<Option<(usize, String)>> {
        let mut conn = self.conn.clone();
        let (len, tail): (usize, Option<String>) = redis::pipe()
            .atomic()
            .llen(key)
            .lindex(key, -1)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                self.record_redis_error(key, "LINDEX", &e);
                CacheError::Redis(e)
            })?;

        Ok(tail.filter(|_| len > 0).map(|tail| (len, tail)))
    }

    async fn push_front_bounded(&self, key: &str, item: &str, limit: usize) -> CacheResult<bool> {
        if limit == 0 {
            return Err(CacheError::InvalidData(
                "list limit must be positive".to_string(),
            ));
        }

        let mut conn = self.conn.clone();
        // LPUSHX is a no-op on a missing key; LTRIM on a missing key too
        let (len,): (i64,) = redis::pipe()
            .atomic()
            .cmd("LPUSHX")
            .arg(key)
            .arg(item)
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(limit as isize - 1)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                self.record_redis_error(key, "LPUSHX", &e);
                CacheError::Redis(e)
            })?;

        let applied = len > 0;
        debug!(key = %key, applied, "Cache push front");
        self.metrics.record_push(key, applied);
        Ok(applied)
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            self.record_redis_error(key, "DEL", &e);
            CacheError::Redis(e)
        })?;

        debug!(key = %key, "Cache delete");
        self.metrics.record_invalidation(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await.map_err(|e| {
            self.record_redis_error(&keys[0], "DEL", &e);
            CacheError::Redis(e)
        })?;

        for key in keys {
            self.metrics.record_invalidation(key);
        }
        debug!(count = keys.len(), "Cache batch delete");
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.map_err(|e| {
            self.record_redis_error(key, "GET", &e);
            CacheError::Redis(e)
        })?;

        match value {
            Some(_) => self.metrics.record_hit(key),
            None => self.metrics.record_miss(key),
        }
        Ok(value)
    }

    async fn set_counter(&self, key: &str, value: i64, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, add_jitter(ttl_secs))
            .await
            .map_err(|e| {
                self.record_redis_error(key, "SETEX", &e);
                CacheError::Redis(e)
            })?;

        self.metrics.record_write(key);
        Ok(())
    }

    async fn incr_if_exists(&self, key: &str, delta: i64) -> CacheResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = self
            .incr_if_exists
            .key(key)
            .arg(delta)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                self.record_redis_error(key, "EVALSHA", &e);
                CacheError::Redis(e)
            })?;

        match value {
            Some(_) => self.metrics.record_hit(key),
            None => self.metrics.record_miss(key),
        }
        Ok(value)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis PING failed: {}", e);
                CacheError::Redis(e)
            })?;
        Ok(())
    }
}
