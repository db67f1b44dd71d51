//! In-process cache backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CacheError, CacheStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed store. Expired entries are dropped on read and by
/// [`spawn_sweep_task`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let pattern = glob::Pattern::new(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Periodically drop expired entries
pub fn spawn_sweep_task(cache: Arc<MemoryCache>, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!(removed, remaining = cache.len(), "Cache sweep");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("user:1", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("user:1").await.unwrap().as_deref(), Some("v"));

        cache.delete("user:1").await.unwrap();
        assert_eq!(cache.get("user:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());

        cache.set("k2", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.sweep_expired(), 1);
    }

    #[test]
    fn test_take_is_single_use() {
        let cache = MemoryCache::new();
        tokio_test::block_on(async {
            cache.set("otp:pin:a@b.io", "123456".into(), Duration::from_secs(60)).await.unwrap();
            assert_eq!(cache.take("otp:pin:a@b.io").await.unwrap().as_deref(), Some("123456"));
            assert_eq!(cache.take("otp:pin:a@b.io").await.unwrap(), None);
        });
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("transactions:u1:1:20", "a".into(), ttl).await.unwrap();
        cache.set("transactions:u1:2:20", "b".into(), ttl).await.unwrap();
        cache.set("transactions:u10:1:20", "c".into(), ttl).await.unwrap();
        cache.set("user:u1", "d".into(), ttl).await.unwrap();

        let removed = cache.delete_by_pattern("transactions:u1:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("transactions:u10:1:20").await.unwrap().is_some());
        assert!(cache.get("user:u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_error() {
        let cache = MemoryCache::new();
        assert!(cache.delete_by_pattern("[").await.is_err());
    }
}
