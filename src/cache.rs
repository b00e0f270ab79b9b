//! Cache store for trending listings.
//!
//! [`CacheStore`] is a plain string key/value store with per-entry TTL, the
//! same shape as an edge KV namespace. [`TrendingCache`] layers the record
//! codec on top. Callers hold an `Option<TrendingCache>`; `None` behaves
//! like a store that always misses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::warn;

use crate::trending::{QueryKey, TrendingRecord};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Expired entries are evicted when read and swept on
/// every write, so keys that are never read again do not accumulate.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
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
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let entry = Entry {
            value,
            expires_at: now + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}

/// Typed view over a [`CacheStore`] holding JSON-encoded record lists.
#[derive(Clone)]
pub struct TrendingCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl TrendingCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Backend failures and undecodable entries are logged and treated as a
    /// miss.
    pub async fn get(&self, key: &QueryKey) -> Option<Vec<TrendingRecord>> {
        let cache_key = key.cache_key();
        let raw = match self.store.get(&cache_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn put(&self, key: &QueryKey, records: &[TrendingRecord]) -> Result<(), CacheError> {
        let raw = serde_json::to_string(records).map_err(CacheError::Encode)?;
        self.store.put(&key.cache_key(), raw, self.ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trending::{repo_url, Since};

    fn record(rank: u32, owner: &str, repo: &str) -> TrendingRecord {
        TrendingRecord {
            rank,
            owner: owner.into(),
            repo: repo.into(),
            url: repo_url(owner, repo),
            description: format!("{repo} & \"quoted\" <desc>"),
            language: "Rust".into(),
            stars: 1_000 * rank as u64,
            forks: 10,
            stars_in_window: rank as u64,
        }
    }

    fn cache(ttl: Duration) -> (Arc<MemoryCache>, TrendingCache) {
        let store = Arc::new(MemoryCache::new());
        let cache = TrendingCache::new(store.clone(), ttl);
        (store, cache)
    }

    #[tokio::test]
    async fn test_records_survive_cache_round_trip_in_order() {
        let (_, cache) = cache(Duration::from_secs(60));
        let key = QueryKey::new(Some("rust"), Since::Daily);
        let records = vec![record(1, "a", "x"), record(2, "b", "y"), record(3, "c", "z")];

        cache.put(&key, &records).await.unwrap();
        assert_eq!(cache.get(&key).await, Some(records));
    }

    #[tokio::test]
    async fn test_miss_for_unknown_key() {
        let (_, cache) = cache(Duration::from_secs(60));
        assert!(cache.get(&QueryKey::new(None, Since::Weekly)).await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (store, cache) = cache(Duration::from_secs(60));
        let daily = QueryKey::new(Some("go"), Since::Daily);
        let weekly = QueryKey::new(Some("go"), Since::Weekly);

        cache.put(&daily, &[record(1, "a", "b")]).await.unwrap();
        assert!(cache.get(&weekly).await.is_none());
        assert!(store.get("trending:go:daily").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let (store, cache) = cache(Duration::from_secs(10));
        let key = QueryKey::new(None, Since::Daily);
        cache.put(&key, &[record(1, "a", "b")]).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_swept_on_write() {
        let (store, cache) = cache(Duration::from_secs(10));
        for language in ["a", "b", "c"] {
            let key = QueryKey::new(Some(language), Since::Daily);
            cache.put(&key, &[record(1, "a", "b")]).await.unwrap();
        }
        assert_eq!(store.len(), 3);

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = QueryKey::new(Some("d"), Since::Daily);
        cache.put(&fresh, &[record(1, "a", "b")]).await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(cache.get(&fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (store, cache) = cache(Duration::from_secs(60));
        store
            .put("trending:all:daily", "not json".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get(&QueryKey::new(None, Since::Daily)).await.is_none());
    }
}
