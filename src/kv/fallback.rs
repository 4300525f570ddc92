//! Wraps a remote [`KvStore`] with an in-process [`MemoryStore`] fallback.
//!
//! After `FALLBACK_THRESHOLD` consecutive transient failures against the
//! remote, the adapter downgrades to fallback mode and stays there until a
//! remote call succeeds again, flagging health as degraded in the meantime.

use std::sync::atomic::{AtomicU32, AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::memory::MemoryStore;
use super::{KvError, KvMode, KvStore, ScoredMember};

const FALLBACK_THRESHOLD: u32 = 3;

pub struct FallbackKvStore<R: KvStore> {
    remote: R,
    fallback: MemoryStore,
    enabled: bool,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
}

impl<R: KvStore> FallbackKvStore<R> {
    pub fn new(remote: R, enabled: bool) -> Self {
        Self {
            remote,
            fallback: MemoryStore::new(),
            enabled,
            consecutive_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.degraded.store(false, Ordering::Relaxed);
    }

    fn note_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.enabled && failures >= FALLBACK_THRESHOLD {
            self.degraded.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn use_fallback(&self) -> bool {
        self.enabled && self.degraded.load(Ordering::Relaxed)
    }
}

/// Runs `remote_call` unless already degraded; on a transient failure,
/// flips to fallback for this call (and future calls, until remote
/// recovers) rather than surfacing the error.
macro_rules! with_fallback {
    ($self:expr, $remote_call:expr, $fallback_call:expr) => {{
        if $self.use_fallback() {
            $fallback_call
        } else {
            match $remote_call {
                Ok(v) => {
                    $self.note_success();
                    Ok(v)
                }
                Err(KvError::Transient(_)) if $self.enabled => {
                    $self.note_failure();
                    $fallback_call
                }
                Err(e) => Err(e),
            }
        }
    }};
}

#[async_trait]
impl<R: KvStore> KvStore for FallbackKvStore<R> {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        with_fallback!(self, self.remote.get(key).await, self.fallback.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.set(key, value, ttl).await,
            self.fallback.set(key, value, ttl).await
        )
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        with_fallback!(self, self.remote.del(key).await, self.fallback.del(key).await)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        with_fallback!(
            self,
            self.remote.scan_prefix(prefix).await,
            self.fallback.scan_prefix(prefix).await
        )
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.zadd(key, score, member).await,
            self.fallback.zadd(key, score, member).await
        )
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.zrem(key, member).await,
            self.fallback.zrem(key, member).await
        )
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        with_fallback!(self, self.remote.zcard(key).await, self.fallback.zcard(key).await)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>, KvError> {
        with_fallback!(
            self,
            self.remote.zrange(key, start, stop).await,
            self.fallback.zrange(key, start, stop).await
        )
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.hset(key, field, value).await,
            self.fallback.hset(key, field, value).await
        )
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        with_fallback!(
            self,
            self.remote.hget(key, field).await,
            self.fallback.hget(key, field).await
        )
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.hdel(key, field).await,
            self.fallback.hdel(key, field).await
        )
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        with_fallback!(
            self,
            self.remote.hgetall(key).await,
            self.fallback.hgetall(key).await
        )
    }

    async fn pop_ready_and_mark(
        &self,
        pending_key: &str,
        processing_key: &str,
        max_score: f64,
        now_score: f64,
    ) -> Result<Option<ScoredMember>, KvError> {
        with_fallback!(
            self,
            self.remote
                .pop_ready_and_mark(pending_key, processing_key, max_score, now_score)
                .await,
            self.fallback
                .pop_ready_and_mark(pending_key, processing_key, max_score, now_score)
                .await
        )
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        with_fallback!(
            self,
            self.remote.acquire_lock(name, holder_id, ttl).await,
            self.fallback.acquire_lock(name, holder_id, ttl).await
        )
    }

    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<(), KvError> {
        with_fallback!(
            self,
            self.remote.release_lock(name, holder_id).await,
            self.fallback.release_lock(name, holder_id).await
        )
    }

    fn mode(&self) -> KvMode {
        if self.use_fallback() {
            KvMode::Fallback
        } else {
            self.remote.mode()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysTransient;

    #[async_trait]
    impl KvStore for AlwaysTransient {
        async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn set(&self, _k: &str, _v: &str, _ttl: Option<Duration>) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn del(&self, _k: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn scan_prefix(&self, _p: &str) -> Result<Vec<String>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn zadd(&self, _k: &str, _s: f64, _m: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn zrem(&self, _k: &str, _m: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn zcard(&self, _k: &str) -> Result<u64, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn zrange(&self, _k: &str, _s: i64, _e: i64) -> Result<Vec<ScoredMember>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn hset(&self, _k: &str, _f: &str, _v: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn hget(&self, _k: &str, _f: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn hdel(&self, _k: &str, _f: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn hgetall(&self, _k: &str) -> Result<Vec<(String, String)>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn pop_ready_and_mark(
            &self,
            _p: &str,
            _pr: &str,
            _max: f64,
            _now: f64,
        ) -> Result<Option<ScoredMember>, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn acquire_lock(&self, _n: &str, _h: &str, _t: Duration) -> Result<bool, KvError> {
            Err(KvError::Transient("down".into()))
        }
        async fn release_lock(&self, _n: &str, _h: &str) -> Result<(), KvError> {
            Err(KvError::Transient("down".into()))
        }
        fn mode(&self) -> KvMode {
            KvMode::Remote
        }
    }

    #[tokio::test]
    async fn downgrades_to_fallback_after_threshold_failures() {
        let store = FallbackKvStore::new(AlwaysTransient, true);
        assert_eq!(store.mode(), KvMode::Remote);
        for _ in 0..FALLBACK_THRESHOLD {
            store.set("k", "v", None).await.unwrap();
        }
        assert!(store.is_degraded());
        assert_eq!(store.mode(), KvMode::Fallback);
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn disabled_fallback_surfaces_transient_errors() {
        let store = FallbackKvStore::new(AlwaysTransient, false);
        assert!(store.get("k").await.is_err());
    }
}
