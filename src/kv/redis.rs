//! Remote KV Store Adapter backed by a Redis-compatible keyspace.
//!
//! A single `ConnectionManager` is shared across the process; it
//! reconnects transparently, so every call here either succeeds or maps a
//! driver error onto [`KvError::Transient`] for the caller to retry.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};

use super::{KvError, KvMode, KvStore, ScoredMember};

/// Lua routine implementing the atomic "pop lowest-ready + mark
/// processing" primitive the Job Queue's dequeue needs. `KEYS[1]` is the
/// pending sorted set, `KEYS[2]` the processing hash; `ARGV[1]` is the
/// inclusive max score, `ARGV[2]` the value stored against the member in
/// the processing hash (the dequeue timestamp).
const POP_READY_AND_MARK: &str = r#"
local entries = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'WITHSCORES', 'LIMIT', 0, 1)
if #entries == 0 then
    return nil
end
local member = entries[1]
local score = entries[2]
redis.call('ZREM', KEYS[1], member)
redis.call('HSET', KEYS[2], member, ARGV[2])
return {member, score}
"#;

/// Lock acquisition via `SET NX PX`; release only if we're still the
/// recorded holder (a classic compare-and-delete via Lua to avoid a
/// lock-released-out-from-under-us race).
const RELEASE_LOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Transient(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Transient(e.to_string()))?;
        Ok(Self {
            manager,
            prefix: key_prefix.to_string(),
        })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.manager.clone()
    }

    /// Namespaces a logical key under this store's configured prefix, so
    /// several deployments can share one Redis-compatible endpoint without
    /// colliding keyspaces.
    fn k(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    fn unprefix(&self, key: String) -> String {
        key.strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::to_string)
            .unwrap_or(key)
    }
}

fn transient(e: redis::RedisError) -> KvError {
    KvError::Transient(e.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.conn().get(self.k(key)).await.map_err(transient)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn();
        let key = self.k(key);
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(transient),
            None => conn.set::<_, _, ()>(key, value).await.map_err(transient),
        }
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.conn().del::<_, ()>(self.k(key)).await.map_err(transient)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let pattern = format!("{}*", self.k(prefix));
        let mut conn = self.conn();
        let keys: Vec<String> = conn.keys(&pattern).await.map_err(transient)?;
        Ok(keys.into_iter().map(|k| self.unprefix(k)).collect())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError> {
        self.conn()
            .zadd::<_, _, _, ()>(self.k(key), member, score)
            .await
            .map_err(transient)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.conn().zrem::<_, _, ()>(self.k(key), member).await.map_err(transient)
    }

    async fn zcard(&self, key: &str) -> Result<u64, KvError> {
        self.conn().zcard(self.k(key)).await.map_err(transient)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>, KvError> {
        let raw: Vec<(String, f64)> = self
            .conn()
            .zrange_withscores(self.k(key), start as isize, stop as isize)
            .await
            .map_err(transient)?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember { member, score })
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.conn().hset::<_, _, _, ()>(self.k(key), field, value).await.map_err(transient)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        self.conn().hget(self.k(key), field).await.map_err(transient)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        self.conn().hdel::<_, _, ()>(self.k(key), field).await.map_err(transient)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError> {
        let map: std::collections::HashMap<String, String> =
            self.conn().hgetall(self.k(key)).await.map_err(transient)?;
        Ok(map.into_iter().collect())
    }

    async fn pop_ready_and_mark(
        &self,
        pending_key: &str,
        processing_key: &str,
        max_score: f64,
        now_score: f64,
    ) -> Result<Option<ScoredMember>, KvError> {
        let result: Option<(String, f64)> = Script::new(POP_READY_AND_MARK)
            .key(self.k(pending_key))
            .key(self.k(processing_key))
            .arg(max_score)
            .arg(now_score)
            .invoke_async(&mut self.conn())
            .await
            .map_err(transient)?;
        Ok(result.map(|(member, score)| ScoredMember { member, score }))
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as u64));
        let result: Option<String> = self
            .conn()
            .set_options(self.k(name), holder_id, opts)
            .await
            .map_err(transient)?;
        Ok(result.is_some())
    }

    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<(), KvError> {
        let deleted: i64 = Script::new(RELEASE_LOCK)
            .key(self.k(name))
            .arg(holder_id)
            .invoke_async(&mut self.conn())
            .await
            .map_err(transient)?;
        if deleted == 1 {
            Ok(())
        } else {
            Err(KvError::LockNotHeld(name.to_string(), holder_id.to_string()))
        }
    }

    fn mode(&self) -> KvMode {
        KvMode::Remote
    }
}
