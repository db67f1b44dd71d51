//! Read-through cache for derived views.
//!
//! The cache is never authoritative: every store failure is logged and
//! treated as a miss, and balances used for money movement are always read
//! from the database.

pub mod keys;
pub mod memory;
pub mod redis_store;

pub use keys::{CacheKey, Invalidation, Mutation, OtpPurpose};
pub use memory::{spawn_sweep_task, MemoryCache};
pub use redis_store::RedisCache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CacheBackend, CacheConfig};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Key-value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Read and delete in one step
    async fn take(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob, returning the number removed
    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Typed, fail-open front for a [`CacheStore`]
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    backend: &'static str,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, backend: &'static str) -> Self {
        Self { store, backend }
    }

    /// A fresh in-process cache without a sweep task
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), "memory")
    }

    /// Build the configured backend. A Redis connection failure is returned
    /// to the caller rather than silently falling back.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match config.backend {
            CacheBackend::Memory => {
                let store = Arc::new(MemoryCache::new());
                spawn_sweep_task(store.clone(), config.sweep_interval);
                info!("Using in-memory cache");
                Ok(Self::new(store, "memory"))
            }
            CacheBackend::Redis => {
                let store = RedisCache::connect(&config.redis_url).await?;
                store.ping().await?;
                info!(url = %config.redis_url, "Connected to Redis cache");
                Ok(Self::new(Arc::new(store), "redis"))
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.render();
        let raw = match self.store.get(&rendered).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %rendered, error = %e, "Cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %rendered, error = %e, "Discarding undecodable cache entry");
                self.delete_raw(&rendered).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let rendered = key.render();
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %rendered, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(&rendered, raw, key.ttl()).await {
            warn!(key = %rendered, error = %e, "Cache write failed");
        }
    }

    /// Store a plain string value
    pub async fn set_raw(&self, key: &CacheKey, value: &str) {
        let rendered = key.render();
        if let Err(e) = self.store.set(&rendered, value.to_string(), key.ttl()).await {
            warn!(key = %rendered, error = %e, "Cache write failed");
        }
    }

    /// Read and remove a plain string value
    pub async fn take_raw(&self, key: &CacheKey) -> Option<String> {
        let rendered = key.render();
        match self.store.take(&rendered).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %rendered, error = %e, "Cache take failed");
                None
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        self.delete_raw(&key.render()).await;
    }

    async fn delete_raw(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    /// Drop every entry the mutation made stale
    pub async fn invalidate(&self, mutation: &Mutation) {
        let mut removed = 0;
        for invalidation in mutation.invalidations() {
            match invalidation {
                Invalidation::Key(key) => {
                    self.delete_raw(&key).await;
                    removed += 1;
                }
                Invalidation::Pattern(pattern) => {
                    match self.store.delete_by_pattern(&pattern).await {
                        Ok(n) => removed += n,
                        Err(e) => {
                            warn!(pattern = %pattern, error = %e, "Cache pattern delete failed")
                        }
                    }
                }
            }
        }
        debug!(mutation = mutation.name(), removed, "Cache invalidated");
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        balance: f64,
    }

    /// Store whose every call fails
    struct BrokenStore {
        calls: AtomicUsize,
    }

    impl BrokenStore {
        fn fail(&self) -> CacheError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CacheError::Pattern(glob::Pattern::new("[").unwrap_err())
        }
    }

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(self.fail())
        }
        async fn set(&self, _: &str, _: String, _: Duration) -> Result<(), CacheError> {
            Err(self.fail())
        }
        async fn take(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(self.fail())
        }
        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(self.fail())
        }
        async fn delete_by_pattern(&self, _: &str) -> Result<usize, CacheError> {
            Err(self.fail())
        }
        async fn ping(&self) -> Result<(), CacheError> {
            Err(self.fail())
        }
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let cache = Cache::in_memory();
        let key = CacheKey::UserProfile("u1".into());
        let profile = Profile { name: "Asha".into(), balance: 12.5 };

        assert_eq!(cache.get_json::<Profile>(&key).await, None);
        cache.set_json(&key, &profile).await;
        assert_eq!(cache.get_json::<Profile>(&key).await, Some(profile));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryCache::new());
        let cache = Cache::new(store.clone(), "memory");
        store.set("user:u1", "not json".into(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get_json::<Profile>(&CacheKey::UserProfile("u1".into())).await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_transfer_drops_both_parties() {
        let cache = Cache::in_memory();
        for id in ["s", "r", "other"] {
            cache.set_json(&CacheKey::UserProfile(id.into()), &1).await;
            cache
                .set_json(
                    &CacheKey::TransactionPage { user_id: id.into(), page: 1, limit: 20 },
                    &1,
                )
                .await;
        }

        cache
            .invalidate(&Mutation::Transfer { sender_id: "s".into(), receiver_id: "r".into() })
            .await;

        for id in ["s", "r"] {
            assert_eq!(cache.get_json::<i32>(&CacheKey::UserProfile(id.into())).await, None);
            let page = CacheKey::TransactionPage { user_id: id.into(), page: 1, limit: 20 };
            assert_eq!(cache.get_json::<i32>(&page).await, None);
        }
        assert_eq!(cache.get_json::<i32>(&CacheKey::UserProfile("other".into())).await, Some(1));
    }

    #[tokio::test]
    async fn test_store_failures_fail_open() {
        let store = Arc::new(BrokenStore { calls: AtomicUsize::new(0) });
        let cache = Cache::new(store.clone(), "broken");
        let key = CacheKey::Requests("u1".into());

        cache.set_json(&key, &1).await;
        assert_eq!(cache.get_json::<i32>(&key).await, None);
        assert_eq!(cache.take_raw(&key).await, None);
        cache.invalidate(&Mutation::Deposit { user_id: "u1".into() }).await;
        assert!(!cache.is_healthy().await);
        assert!(store.calls.load(Ordering::SeqCst) >= 5);
    }
}
