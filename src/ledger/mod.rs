//! Operation Ledger: per-instance-per-kind record of in-flight operations,
//! used to deduplicate client intents. A repeated
//! `start` while a non-terminal `start` operation already exists returns
//! that operation's id instead of creating a second one.

mod errors;

pub use errors::LedgerError;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::KvStore;

/// TTL on the per-(instance, kind) lock guarding `begin`'s check-and-create.
/// Long enough to survive a slow KV round trip, short enough that a crash
/// mid-critical-section doesn't wedge the instance.
const BEGIN_LOCK_TTL: Duration = Duration::from_secs(5);
const BEGIN_LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);
const BEGIN_LOCK_MAX_ATTEMPTS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Stop,
    Delete,
    Migrate,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
            Self::Migrate => "migrate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Initiated,
    Monitoring,
    HealthChecking,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub instance_id: String,
    pub kind: OperationKind,
    pub state: OperationState,
    pub initiated_at: DateTime<Utc>,
    pub monitoring_at: Option<DateTime<Utc>>,
    pub health_checking_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct OperationLedger {
    kv: Arc<dyn KvStore>,
}

fn key(instance_id: &str, kind: OperationKind) -> String {
    format!("op:{instance_id}:{}", kind.as_str())
}

fn lock_key(instance_id: &str, kind: OperationKind) -> String {
    format!("lock:op:{instance_id}:{}", kind.as_str())
}

impl OperationLedger {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn load(&self, instance_id: &str, kind: OperationKind) -> Result<Option<Operation>, LedgerError> {
        match self.kv.get(&key(instance_id, kind)).await? {
            Some(raw) => {
                let op = serde_json::from_str(&raw).map_err(|e| LedgerError::Codec {
                    instance_id: instance_id.to_string(),
                    message: e.to_string(),
                })?;
                Ok(Some(op))
            }
            None => Ok(None),
        }
    }

    async fn store(&self, op: &Operation) -> Result<(), LedgerError> {
        let raw = serde_json::to_string(op).map_err(|e| LedgerError::Codec {
            instance_id: op.instance_id.clone(),
            message: e.to_string(),
        })?;
        self.kv.set(&key(&op.instance_id, op.kind), &raw, None).await?;
        Ok(())
    }

    /// The existing non-terminal operation for `(instance_id, kind)`, if any.
    pub async fn active(&self, instance_id: &str, kind: OperationKind) -> Result<Option<Operation>, LedgerError> {
        Ok(self
            .load(instance_id, kind)
            .await?
            .filter(|op| !op.state.is_terminal()))
    }

    /// All operations of `kind` currently in the `failed` state. Used by
    /// the Migration Controller's slower retry loop to re-attempt
    /// previously-failed migrations without rescanning the whole Provider
    /// fleet.
    pub async fn failed_operations(&self, kind: OperationKind) -> Result<Vec<Operation>, LedgerError> {
        let suffix = format!(":{}", kind.as_str());
        let mut out = Vec::new();
        for key in self.kv.scan_prefix("op:").await? {
            if !key.ends_with(&suffix) {
                continue;
            }
            if let Some(raw) = self.kv.get(&key).await? {
                let op: Operation = serde_json::from_str(&raw).map_err(|e| LedgerError::Codec {
                    instance_id: key.clone(),
                    message: e.to_string(),
                })?;
                if op.state == OperationState::Failed {
                    out.push(op);
                }
            }
        }
        Ok(out)
    }

    /// Starts a new operation, or returns the existing non-terminal one
    /// unchanged — the caller cannot tell the two cases apart from the
    /// returned `Operation` alone, only from whether it already held state.
    ///
    /// The check-and-create is guarded by a short-lived distributed lock so
    /// two concurrent callers for the same `(instance_id, kind)` can't both
    /// observe no active operation and each create their own — only one
    /// `Operation` is ever created per in-flight intent.
    pub async fn begin(&self, instance_id: &str, kind: OperationKind) -> Result<Operation, LedgerError> {
        let (op, _was_new) = self.begin_with_lock(instance_id, kind).await?;
        Ok(op)
    }

    /// Like `begin`, but returns `None` instead of the pre-existing
    /// operation when one is already active — for callers that need to
    /// know whether *this* call is the one that created it, e.g. to decide
    /// whether to issue the one mutating call an operation guards.
    pub async fn try_begin(&self, instance_id: &str, kind: OperationKind) -> Result<Option<Operation>, LedgerError> {
        let (op, was_new) = self.begin_with_lock(instance_id, kind).await?;
        Ok(was_new.then_some(op))
    }

    async fn begin_with_lock(&self, instance_id: &str, kind: OperationKind) -> Result<(Operation, bool), LedgerError> {
        let lock_name = lock_key(instance_id, kind);
        let holder = Uuid::new_v4().to_string();

        let mut attempt = 0u32;
        while !self.kv.acquire_lock(&lock_name, &holder, BEGIN_LOCK_TTL).await? {
            attempt += 1;
            if attempt >= BEGIN_LOCK_MAX_ATTEMPTS {
                return Err(LedgerError::LockContention {
                    instance_id: instance_id.to_string(),
                    kind: kind.as_str(),
                });
            }
            tokio::time::sleep(BEGIN_LOCK_RETRY_DELAY).await;
        }

        let result = self.begin_locked(instance_id, kind).await;

        if let Err(e) = self.kv.release_lock(&lock_name, &holder).await {
            tracing::warn!(instance_id, kind = kind.as_str(), error = %e, "failed to release operation begin lock");
        }
        result
    }

    async fn begin_locked(&self, instance_id: &str, kind: OperationKind) -> Result<(Operation, bool), LedgerError> {
        if let Some(existing) = self.active(instance_id, kind).await? {
            return Ok((existing, false));
        }
        let op = Operation {
            operation_id: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            kind,
            state: OperationState::Initiated,
            initiated_at: Utc::now(),
            monitoring_at: None,
            health_checking_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
        };
        self.store(&op).await?;
        Ok((op, true))
    }

    pub async fn transition(
        &self,
        instance_id: &str,
        kind: OperationKind,
        state: OperationState,
    ) -> Result<(), LedgerError> {
        let Some(mut op) = self.load(instance_id, kind).await? else {
            return Ok(());
        };
        let now = Utc::now();
        match state {
            OperationState::Monitoring => op.monitoring_at = Some(now),
            OperationState::HealthChecking => op.health_checking_at = Some(now),
            OperationState::Completed => op.completed_at = Some(now),
            OperationState::Failed => op.failed_at = Some(now),
            OperationState::Initiated => {}
        }
        op.state = state;
        self.store(&op).await
    }

    pub async fn fail(&self, instance_id: &str, kind: OperationKind, error: impl Into<String>) -> Result<(), LedgerError> {
        let Some(mut op) = self.load(instance_id, kind).await? else {
            return Ok(());
        };
        op.state = OperationState::Failed;
        op.failed_at = Some(Utc::now());
        op.error = Some(error.into());
        self.store(&op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;

    fn ledger() -> OperationLedger {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        OperationLedger::new(kv)
    }

    #[tokio::test]
    async fn duplicate_start_returns_same_operation() {
        let ledger = ledger();
        let first = ledger.begin("i-1", OperationKind::Start).await.unwrap();
        let second = ledger.begin("i-1", OperationKind::Start).await.unwrap();
        assert_eq!(first.operation_id, second.operation_id);
    }

    #[tokio::test]
    async fn completed_operation_no_longer_blocks_new_ones() {
        let ledger = ledger();
        let first = ledger.begin("i-1", OperationKind::Start).await.unwrap();
        ledger
            .transition("i-1", OperationKind::Start, OperationState::Completed)
            .await
            .unwrap();
        let second = ledger.begin("i-1", OperationKind::Start).await.unwrap();
        assert_ne!(first.operation_id, second.operation_id);
    }

    #[tokio::test]
    async fn different_kinds_are_independent() {
        let ledger = ledger();
        let start = ledger.begin("i-1", OperationKind::Start).await.unwrap();
        let stop = ledger.begin("i-1", OperationKind::Stop).await.unwrap();
        assert_ne!(start.operation_id, stop.operation_id);
    }

    #[tokio::test]
    async fn try_begin_reports_only_the_creating_call() {
        let ledger = ledger();
        let first = ledger
            .try_begin("i-1", OperationKind::Migrate)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = ledger
            .try_begin("i-1", OperationKind::Migrate)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn concurrent_begin_creates_exactly_one_operation() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(OperationLedger::new(kv));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                ledger.begin("i-1", OperationKind::Start).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().operation_id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1, "exactly one operation should have been created");
    }
}
