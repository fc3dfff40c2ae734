//! In-process cache backend
//!
//! Same semantics as the Redis backend, without expiry. Tests use
//! `set_unavailable` to simulate an unreachable cache.

use crate::{CacheBackend, CacheError, CacheResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
enum Value {
    List(VecDeque<String>),
    Counter(i64),
}

#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, (Value, u64)>>,
    unavailable: AtomicBool,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop every key, as if all TTLs elapsed.
    pub fn expire_all(&self) {
        self.entries.lock().clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Length of a list key, 0 when absent.
    pub fn len(&self, key: &str) -> usize {
        match self.entries.lock().get(key) {
            Some((Value::List(items), _)) => items.len(),
            _ => 0,
        }
    }

    /// TTL recorded by the last full write of a key.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    fn check(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("memory backend switched off".into()))
        } else {
            Ok(())
        }
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::InvalidData(format!("wrong value type for key {}", key))
}

#[async_trait::async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn read_list(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
        self.check()?;
        match self.entries.lock().get(key) {
            Some((Value::List(items), _)) => Ok(Some(items.iter().cloned().collect())),
            Some((Value::Counter(_), _)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn replace_list(&self, key: &str, items: &[String], ttl_secs: u64) -> CacheResult<()> {
        self.check()?;
        let mut entries = self.entries.lock();
        entries.remove(key);
        if !items.is_empty() {
            entries.insert(
                key.to_string(),
                (Value::List(items.iter().cloned().collect()), ttl_secs),
            );
        }
        Ok(())
    }

    async fn list_tail(&self, key: &str) -> CacheResult<Option<(usize, String)>> {
        self.check()?;
        match self.entries.lock().get(key) {
            Some((Value::List(items), _)) => Ok(items.back().map(|tail| (items.len(), tail.clone()))),
            Some((Value::Counter(_), _)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn push_front_bounded(&self, key: &str, item: &str, limit: usize) -> CacheResult<bool> {
        self.check()?;
        if limit == 0 {
            return Err(CacheError::InvalidData(
                "list limit must be positive".to_string(),
            ));
        }
        match self.entries.lock().get_mut(key) {
            Some((Value::List(items), _)) => {
                items.push_front(item.to_string());
                items.truncate(limit);
                Ok(true)
            }
            Some((Value::Counter(_), _)) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> CacheResult<()> {
        self.check()?;
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>> {
        self.check()?;
        match self.entries.lock().get(key) {
            Some((Value::Counter(value), _)) => Ok(Some(*value)),
            Some((Value::List(_), _)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_counter(&self, key: &str, value: i64, ttl_secs: u64) -> CacheResult<()> {
        self.check()?;
        self.entries
            .lock()
            .insert(key.to_string(), (Value::Counter(value), ttl_secs));
        Ok(())
    }

    async fn incr_if_exists(&self, key: &str, delta: i64) -> CacheResult<Option<i64>> {
        self.check()?;
        match self.entries.lock().get_mut(key) {
            Some((Value::Counter(value), _)) => {
                *value += delta;
                Ok(Some(*value))
            }
            Some((Value::List(_), _)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }
}
