//! KV Store Adapter: key/value + sorted-set + hash operations over a
//! remote keyspace, with an in-process fallback when the remote is
//! unavailable.

pub mod fallback;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Concrete error taxonomy at the KV boundary. Callers match on *kind*,
/// never on a driver's error message or a duck-typed `"WRONGTYPE"` string.
#[derive(Debug, Error, Clone)]
pub enum KvError {
    /// Network/timeout — callers may retry.
    #[error("transient KV error: {0}")]
    Transient(String),
    /// Stored value's type didn't match what the caller expected — the
    /// caller must skip the offending key and continue, not abort the scan.
    #[error("KV type mismatch on key '{key}'")]
    Protocol { key: String },
    #[error("lock '{0}' already held")]
    LockHeld(String),
    #[error("lock '{0}' not held by '{1}'")]
    LockNotHeld(String, String),
}

/// Which backend is currently serving requests. Exposed in `GetHealth()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvMode {
    Remote,
    Fallback,
}

/// A member popped from a sorted set, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    /// Keys matching `prefix*`. Implementations skip (never error on) keys
    /// whose stored type doesn't match what this adapter expects.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), KvError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn zcard(&self, key: &str) -> Result<u64, KvError>;
    /// Ascending-score range, inclusive, `[start, stop]` by rank (0-indexed,
    /// -1 meaning "to the end"), mirroring Redis `ZRANGE`.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>, KvError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, KvError>;

    /// Atomically pop the lowest-scoring member of `pending_key` with
    /// `score <= max_score` and record it (with `member -> now_score`) in
    /// `processing_key`. This is the "pop + mark processing" primitive the
    /// Job Queue relies on for single-writer-per-job.
    async fn pop_ready_and_mark(
        &self,
        pending_key: &str,
        processing_key: &str,
        max_score: f64,
        now_score: f64,
    ) -> Result<Option<ScoredMember>, KvError>;

    async fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, KvError>;
    async fn release_lock(&self, name: &str, holder_id: &str) -> Result<(), KvError>;

    fn mode(&self) -> KvMode;
}
