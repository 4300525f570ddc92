//! Job Queue: priority+FIFO dispatch over the KV Store Adapter, with a
//! delayed set for backoff retries and crash recovery of jobs stuck in
//! `processing` past their handler's deadline.

mod errors;
pub mod model;

pub use errors::QueueError;
pub use model::{Job, JobPayload, JobState, JobType};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::kv::KvStore;
use crate::provider::retry::backoff_delay;

const PENDING_KEY: &str = "queue:pending";
const PROCESSING_KEY: &str = "queue:processing";
const DELAYED_KEY: &str = "queue:delayed";
const COMPLETED_KEY: &str = "queue:completed";
const FAILED_KEY: &str = "queue:failed";

/// Completed/failed retention is capped so these zsets don't grow without
/// bound; trimming happens on every write rather than via a separate sweep.
const TERMINAL_RETENTION: i64 = 2_000;

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

pub struct JobQueue {
    kv: Arc<dyn KvStore>,
}

impl JobQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn load(&self, id: &str) -> Result<Job, QueueError> {
        let raw = self
            .kv
            .get(&job_key(id))
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| QueueError::Codec {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    async fn store(&self, job: &Job) -> Result<(), QueueError> {
        let raw = serde_json::to_string(job).map_err(|e| QueueError::Codec {
            id: job.id.clone(),
            message: e.to_string(),
        })?;
        self.kv.set(&job_key(&job.id), &raw, None).await?;
        Ok(())
    }

    async fn trim_terminal(&self, key: &str) -> Result<(), QueueError> {
        let count = self.kv.zcard(key).await? as i64;
        let overflow = count - TERMINAL_RETENTION;
        if overflow <= 0 {
            return Ok(());
        }
        for scored in self.kv.zrange(key, 0, overflow - 1).await? {
            self.kv.zrem(key, &scored.member).await?;
        }
        Ok(())
    }

    /// Enqueues a freshly created job, immediately eligible for dequeue.
    pub async fn enqueue(&self, payload: JobPayload, priority: i32, max_attempts: u32) -> Result<String, QueueError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            payload,
            priority,
            attempts: 0,
            max_attempts,
            next_eligible_at: now,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
        };
        self.store(&job).await?;
        self.kv
            .zadd(PENDING_KEY, Job::score(priority, now), &job.id)
            .await?;
        Ok(job.id)
    }

    /// Moves any delayed job whose `next_eligible_at` has passed into the
    /// pending set, scored for priority+FIFO ordering from that point on.
    /// Uses a scratch claim hash purely so the pop off `DELAYED_KEY` is
    /// atomic across concurrent workers; the claim itself is discarded.
    async fn promote_due_delayed(&self) -> Result<(), QueueError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        const CLAIMS_KEY: &str = "queue:delayed:claims";
        let due = self.kv.pop_ready_and_mark(DELAYED_KEY, CLAIMS_KEY, now_ms, now_ms).await?;
        let Some(scored) = due else { return Ok(()) };
        self.kv.hdel(CLAIMS_KEY, &scored.member).await?;
        let job = self.load(&scored.member).await?;
        self.kv
            .zadd(PENDING_KEY, Job::score(job.priority, job.created_at), &scored.member)
            .await?;
        Ok(())
    }

    /// Pops the highest-priority, oldest eligible job and marks it
    /// `processing`. Promotes at most one due delayed job per call; workers
    /// calling this in a loop will drain the delayed set as fast as pending.
    pub async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        self.promote_due_delayed().await?;
        let now_ms = Utc::now().timestamp_millis() as f64;
        let popped = self
            .kv
            .pop_ready_and_mark(PENDING_KEY, PROCESSING_KEY, f64::INFINITY, now_ms)
            .await?;
        let Some(scored) = popped else { return Ok(None) };
        let mut job = self.load(&scored.member).await?;
        job.state = JobState::Processing;
        job.updated_at = Utc::now();
        self.store(&job).await?;
        Ok(Some(job))
    }

    pub async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        self.kv.hdel(PROCESSING_KEY, job_id).await?;
        let mut job = self.load(job_id).await?;
        job.state = JobState::Completed;
        job.updated_at = Utc::now();
        self.store(&job).await?;
        self.kv
            .zadd(COMPLETED_KEY, Utc::now().timestamp_millis() as f64, job_id)
            .await?;
        self.trim_terminal(COMPLETED_KEY).await
    }

    /// Terminal failure: attempts exhausted or the handler asked not to
    /// retry. Distinct from `retry()`, which reschedules.
    async fn fail_permanently(&self, job_id: &str, error: String) -> Result<(), QueueError> {
        self.kv.hdel(PROCESSING_KEY, job_id).await?;
        let mut job = self.load(job_id).await?;
        job.state = JobState::Failed;
        job.last_error = Some(error);
        job.updated_at = Utc::now();
        self.store(&job).await?;
        self.kv
            .zadd(FAILED_KEY, Utc::now().timestamp_millis() as f64, job_id)
            .await?;
        self.trim_terminal(FAILED_KEY).await
    }

    /// Reports a handler failure. Reschedules with exponential backoff if
    /// attempts remain, otherwise fails the job permanently.
    pub async fn fail(&self, job_id: &str, error: impl Into<String>) -> Result<(), QueueError> {
        let error = error.into();
        let job = self.load(job_id).await?;
        if job.attempts + 1 >= job.max_attempts {
            return self.fail_permanently(job_id, error).await;
        }
        self.retry(job_id, error).await
    }

    /// Fails `job_id` outright, skipping the attempts budget. Used for
    /// handler errors classified as unrecoverable (`HandlerError::Permanent`),
    /// where retrying would just repeat the same programmer/data error.
    pub async fn fail_immediately(&self, job_id: &str, error: impl Into<String>) -> Result<(), QueueError> {
        self.fail_permanently(job_id, error.into()).await
    }

    /// Reschedules `job_id` into the delayed set with exponential backoff.
    /// Used both by `fail()` (handler raised an error) and by crash
    /// recovery (job never reported back at all).
    pub async fn retry(&self, job_id: &str, error: impl Into<String>) -> Result<(), QueueError> {
        self.kv.hdel(PROCESSING_KEY, job_id).await?;
        let mut job = self.load(job_id).await?;
        job.attempts += 1;
        job.last_error = Some(error.into());
        job.state = JobState::Pending;
        let delay = backoff_delay(job.attempts, Duration::from_secs(5), Duration::from_secs(300));
        job.next_eligible_at = Utc::now() + delay;
        job.updated_at = Utc::now();
        self.store(&job).await?;
        self.kv
            .zadd(DELAYED_KEY, job.next_eligible_at.timestamp_millis() as f64, job_id)
            .await?;
        Ok(())
    }

    /// Re-schedules a still-`processing` job with an updated payload after
    /// `delay`, without touching `attempts` or `maxAttempts`. Used by the
    /// Lifecycle Controller's poll loop (`monitor_instance`/
    /// `monitor_startup`) to re-enqueue the next poll cycle: this is
    /// ordinary cadence, not a handler failure, so it must not count
    /// against the job's retry budget.
    pub async fn reschedule(&self, job_id: &str, payload: JobPayload, delay: Duration) -> Result<(), QueueError> {
        self.kv.hdel(PROCESSING_KEY, job_id).await?;
        let mut job = self.load(job_id).await?;
        job.payload = payload;
        job.state = JobState::Pending;
        job.next_eligible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        job.updated_at = Utc::now();
        self.store(&job).await?;
        self.kv
            .zadd(DELAYED_KEY, job.next_eligible_at.timestamp_millis() as f64, job_id)
            .await?;
        Ok(())
    }

    /// Finds jobs that have sat in `processing` longer than `stuck_after`
    /// (a worker crashed or was killed mid-handler) and requeues them as
    /// failures-to-retry. Intended to run once at boot and periodically.
    /// `PROCESSING_KEY` is a hash of `job_id -> dequeued_at_ms`, written by
    /// `pop_ready_and_mark`, so this walks it directly rather than popping.
    pub async fn recover_stuck(&self, stuck_after: Duration) -> Result<u64, QueueError> {
        let cutoff_ms = (Utc::now() - chrono::Duration::from_std(stuck_after).unwrap_or_default()).timestamp_millis() as f64;
        let mut recovered = 0u64;
        for (job_id, dequeued_at_raw) in self.kv.hgetall(PROCESSING_KEY).await? {
            let dequeued_at_ms: f64 = dequeued_at_raw.parse().unwrap_or(f64::MAX);
            if dequeued_at_ms > cutoff_ms {
                continue;
            }
            self.kv.hdel(PROCESSING_KEY, &job_id).await?;
            self.retry(&job_id, "worker crashed or timed out before reporting completion").await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, QueueError> {
        self.load(job_id).await
    }

    pub async fn pending_count(&self) -> Result<u64, QueueError> {
        Ok(self.kv.zcard(PENDING_KEY).await?)
    }

    pub async fn processing_count(&self) -> Result<u64, QueueError> {
        Ok(self.kv.hgetall(PROCESSING_KEY).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryStore;
    use model::{AutoStopCheckPayload, JobPayload};

    fn queue() -> JobQueue {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        JobQueue::new(kv)
    }

    #[tokio::test]
    async fn enqueue_dequeue_complete_roundtrip() {
        let q = queue();
        let id = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 3)
            .await
            .unwrap();
        let job = q.dequeue().await.unwrap().expect("job should be ready");
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(q.dequeue().await.unwrap(), None);
        q.complete(&id).await.unwrap();
        assert_eq!(q.get(&id).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let q = queue();
        let low = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 3)
            .await
            .unwrap();
        let high = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 10, 3)
            .await
            .unwrap();
        let first = q.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, high);
        let second = q.dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn fail_before_exhaustion_reschedules_into_delayed_set() {
        let q = queue();
        let id = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 3)
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        q.fail(&id, "transient provider error").await.unwrap();
        let job = q.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_eligible_at > Utc::now());
        assert_eq!(q.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_after_exhaustion_is_permanent() {
        let q = queue();
        let id = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 1)
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        q.fail(&id, "still broken").await.unwrap();
        assert_eq!(q.get(&id).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn reschedule_delays_without_touching_attempts() {
        let q = queue();
        let id = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 3)
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        q.reschedule(&id, JobPayload::AutoStopCheck(AutoStopCheckPayload {}), Duration::from_secs(30))
            .await
            .unwrap();
        let job = q.get(&id).await.unwrap();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.state, JobState::Pending);
        assert!(job.next_eligible_at > Utc::now());
        assert_eq!(q.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn recover_stuck_requeues_jobs_past_deadline() {
        let q = queue();
        let id = q
            .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, 3)
            .await
            .unwrap();
        q.dequeue().await.unwrap();
        assert_eq!(q.processing_count().await.unwrap(), 1);

        let recovered = q.recover_stuck(Duration::from_millis(0)).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(q.processing_count().await.unwrap(), 0);
        let job = q.get(&id).await.unwrap();
        assert_eq!(job.attempts, 1);
    }
}
