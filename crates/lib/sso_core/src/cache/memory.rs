//! In-process TTL cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Cache, CacheError, glob_match};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// [`Cache`] over a concurrent map. Expired entries are hidden on read and
/// evicted by [`MemoryCache::cleanup`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    /// Number of entries, expired ones included until the next cleanup.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                cache.cleanup();
            }
        })
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(entry.value.clone()),
            _ => Err(CacheError::NotFound),
        }
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

    async fn take(&self, key: &str) -> Result<String, CacheError> {
        match self.entries.remove(key) {
            Some((_, entry)) if entry.expires_at > Instant::now() => Ok(entry.value),
            _ => Err(CacheError::NotFound),
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let now = Instant::now();
        let fresh = || Entry {
            value: "0".into(),
            expires_at: now + ttl,
        };
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(fresh);
        if entry.expires_at <= now {
            *entry = fresh();
        }
        let count = entry
            .value
            .parse::<u64>()
            .map_err(|e| CacheError::Decode(e.to_string()))?
            + 1;
        entry.value = count.to_string();
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<(), CacheError> {
        self.entries.retain(|k, _| !glob_match(pattern, k));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), "v");
        cache.delete("k").await.unwrap();
        assert!(matches!(cache.get("k").await, Err(CacheError::NotFound)));
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert!(matches!(cache.get("k").await, Err(CacheError::NotFound)));
        assert_eq!(cache.len(), 1);
        cache.cleanup();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn delete_by_pattern_only_hits_matches() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("devices:1", "a".into(), ttl).await.unwrap();
        cache.set("devices:2", "b".into(), ttl).await.unwrap();
        cache.set("user:1", "c".into(), ttl).await.unwrap();
        cache.delete_by_pattern("devices:*").await.unwrap();
        assert!(cache.get("devices:1").await.is_err());
        assert!(cache.get("devices:2").await.is_err());
        assert_eq!(cache.get("user:1").await.unwrap(), "c");
    }

    #[tokio::test]
    async fn take_hands_the_value_out_once() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.take("k").await.unwrap(), "v");
        assert!(matches!(cache.take("k").await, Err(CacheError::NotFound)));
        assert!(matches!(cache.get("k").await, Err(CacheError::NotFound)));

        cache.set("old", "v".into(), Duration::ZERO).await.unwrap();
        assert!(matches!(cache.take("old").await, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn concurrent_takes_have_one_winner() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.take("k").await.is_ok() })
            })
            .collect();
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn incr_counts_and_restarts_after_expiry() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.incr("n", ttl).await.unwrap(), 1);
        assert_eq!(cache.incr("n", ttl).await.unwrap(), 2);
        assert_eq!(cache.get("n").await.unwrap(), "2");

        cache.set("gone", "7".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.incr("gone", ttl).await.unwrap(), 1);

        cache.set("text", "abc".into(), ttl).await.unwrap();
        assert!(matches!(
            cache.incr("text", ttl).await,
            Err(CacheError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn typed_helpers() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("code:a@b.c", "4821".into(), ttl).await.unwrap();
        assert_eq!(cache.get_code("code:a@b.c").await.unwrap(), 4821);
        assert_eq!(cache.take_code("code:a@b.c").await.unwrap(), 4821);
        assert!(cache.get("code:a@b.c").await.is_err());

        cache.set("code:bad", "12ab".into(), ttl).await.unwrap();
        assert!(matches!(
            cache.get_code("code:bad").await,
            Err(CacheError::Decode(_))
        ));

        cache.set_json("list", &vec![1, 2, 3], ttl).await.unwrap();
        let list: Vec<i32> = cache.get_json("list").await.unwrap();
        assert_eq!(list, vec![1, 2, 3]);
    }
}
