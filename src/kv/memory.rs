//! In-process fallback KV store: same semantics as the remote adapter, but
//! with no cross-process visibility. Used when the remote is unavailable
//! and fallback is enabled, and as the backend for tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvError, KvMode, KvStore, ScoredMember};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

struct LockEntry {
    holder: String,
    expires_at: Instant,
}

/// `dashmap`-backed KV store with no network round trips.
pub struct MemoryStore {
    strings: DashMap<String, StringEntry>,
    zsets: DashMap<String, Mutex<Vec<(f64, String)>>>,
    hashes: DashMap<String, DashMap<String, String>>,
    locks: DashMap<String, LockEntry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
            zsets: DashMap::new(),
            hashes: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn is_expired(entry: &StringEntry) -> bool {
        entry.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.strings.get(key) {
            Some(entry) if !Self::is_expired(&entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.strings.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.strings.remove(key);
        self.zsets.remove(key);
        self.hashes.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .filter(|e| !Self::is_expired(e.value()))
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.extend(
            self.hashes
                .iter()
                .map(|e| e.key().clone())
                .filter(|k| k.starts_with(prefix)),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        let set = self.zsets.entry(key.to_string()).or_default();
        let mut guard = set.lock().expect("zset mutex poisoned");
        guard.retain(|(_, m)| m != member);
        guard.push((score, member.to_string()));
        guard.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        if let Some(set) = self.zsets.get(key) {
            set.lock().expect("zset mutex poisoned").retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        Ok(self
            .zsets
            .get(key)
            .map(|s| s.lock().expect("zset mutex poisoned").len() as u64)
            .unwrap_or(0))
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>, KvError> {
        let Some(set) = self.zsets.get(key) else {
            return Ok(vec![]);
        };
        let guard = set.lock().expect("zset mutex poisoned");
        let len = guard.len() as i64;
        if len == 0 {
            return Ok(vec![]);
        }
        let norm = |i: i64| -> i64 {
            if i < 0 { (len + i).max(0) } else { i.min(len - 1) }
        };
        let (s, e) = (norm(start), norm(stop));
        if s > e {
            return Ok(vec![]);
        }
        Ok(guard[s as usize..=e as usize]
            .iter()
            .map(|(score, member)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.clone())))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        if let Some(h) = self.hashes.get(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|e| (e.key().clone(), e.value().clone())).collect())
            .unwrap_or_default())
    }

    async fn pop_ready_and_mark(
        &self,
        pending_key: &str,
        processing_key: &str,
        max_score: f64,
        now_score: f64,
    ) -> Result<Option<ScoredMember>, KvError> {
        let set = self.zsets.entry(pending_key.to_string()).or_default();
        let popped = {
            let mut guard = set.lock().expect("zset mutex poisoned");
            // `guard` is kept sorted ascending by score, so the lowest-scoring
            // eligible member (if any) is always at index 0.
            match guard.first() {
                Some((score, _)) if *score <= max_score => Some(guard.remove(0)),
                _ => None,
            }
        };
        let Some((score, member)) = popped else {
            return Ok(None);
        };
        self.hset(processing_key, &member, &now_score.to_string()).await?;
        Ok(Some(ScoredMember { member, score }))
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut acquired = false;
        self.locks
            .entry(name.to_string())
            .and_modify(|entry| {
                if now >= entry.expires_at {
                    entry.holder = holder_id.to_string();
                    entry.expires_at = now + ttl;
                    acquired = true;
                }
            })
            .or_insert_with(|| {
                acquired = true;
                LockEntry {
                    holder: holder_id.to_string(),
                    expires_at: now + ttl,
                }
            });
        Ok(acquired)
    }

    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<(), KvError> {
        let held_by_us = self
            .locks
            .get(name)
            .is_some_and(|e| e.holder == holder_id);
        if held_by_us {
            self.locks.remove(name);
            Ok(())
        } else {
            Err(KvError::LockNotHeld(name.to_string(), holder_id.to_string()))
        }
    }

    fn mode(&self) -> KvMode {
        KvMode::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip_and_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pop_ready_and_mark_is_fifo_by_score() {
        let store = MemoryStore::new();
        store.zadd("pending", 2.0, "b").await.unwrap();
        store.zadd("pending", 1.0, "a").await.unwrap();
        store.zadd("pending", 3.0, "c").await.unwrap();

        let first = store
            .pop_ready_and_mark("pending", "processing", 10.0, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.member, "a");
        assert_eq!(store.zcard("pending").await.unwrap(), 2);
        assert_eq!(
            store.hget("processing", "a").await.unwrap(),
            Some("100".to_string())
        );
    }

    #[tokio::test]
    async fn pop_ready_and_mark_respects_max_score() {
        let store = MemoryStore::new();
        store.zadd("pending", 50.0, "future").await.unwrap();
        let popped = store
            .pop_ready_and_mark("pending", "processing", 10.0, 1.0)
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn lock_is_single_holder() {
        let store = MemoryStore::new();
        assert!(store
            .acquire_lock("lock:x", "holder-1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .acquire_lock("lock:x", "holder-2", Duration::from_secs(10))
            .await
            .unwrap());
        store.release_lock("lock:x", "holder-1").await.unwrap();
        assert!(store
            .acquire_lock("lock:x", "holder-2", Duration::from_secs(10))
            .await
            .unwrap());
    }
}
