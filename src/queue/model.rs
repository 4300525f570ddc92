//! Job types and payloads.
//!
//! Modeled as a tagged Rust enum rather than a discriminator-plus-untyped-
//! JSON-value pair, so the Worker Pool dispatches by `match` instead of by
//! stringly-typed lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::HealthCheckConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstancePayload {
    pub instance_id: String,
    pub product_name: String,
    pub template_id: String,
    pub region: String,
    pub gpu_count: u32,
    pub root_disk_gb: u32,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInstancePayload {
    pub instance_id: String,
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub max_wait_time_ms: i64,
    pub health_check_config: Option<HealthCheckConfig>,
    pub webhook_url: Option<String>,
    /// `monitor_startup` begins from an already-existing instance and
    /// emits `startup_initiated` before its first poll; `monitor_instance`
    /// does not. Everything else about the two job types is identical,
    /// so they share one payload shape distinguished by `JobType`.
    pub is_startup_monitor: bool,
    /// Whether the `startup_initiated` webhook has already fired for this
    /// operation; guards against re-emitting it on every poll cycle.
    pub startup_initiated_emitted: bool,
    /// Set once a `partial` health verdict has been seen, so the handler
    /// requires one additional poll cycle before promoting to `ready`
    /// even if the next verdict flips to healthy.
    pub saw_partial_health: bool,
    /// Set when a healthy verdict arrived immediately after a partial one;
    /// the handler requires a second consecutive healthy verdict before
    /// promoting to `ready`, to suppress single-sample flapping.
    pub pending_ready_confirmation: bool,
    /// Consecutive ambiguous-status polls seen so far. An unrecognized
    /// Provider status re-polls once before the operation is declared
    /// failed.
    pub ambiguous_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoStopCheckPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateSpotPayload {
    pub instance_id: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendWebhookPayload {
    pub url: String,
    pub payload: crate::webhook::WebhookPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobPayload {
    CreateInstance(CreateInstancePayload),
    MonitorInstance(MonitorInstancePayload),
    MonitorStartup(MonitorInstancePayload),
    AutoStopCheck(AutoStopCheckPayload),
    MigrateSpot(MigrateSpotPayload),
    SendWebhook(SendWebhookPayload),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::CreateInstance(_) => JobType::CreateInstance,
            Self::MonitorInstance(_) => JobType::MonitorInstance,
            Self::MonitorStartup(_) => JobType::MonitorStartup,
            Self::AutoStopCheck(_) => JobType::AutoStopCheck,
            Self::MigrateSpot(_) => JobType::MigrateSpot,
            Self::SendWebhook(_) => JobType::SendWebhook,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CreateInstance,
    MonitorInstance,
    MonitorStartup,
    AutoStopCheck,
    MigrateSpot,
    SendWebhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// `score = -(priority) * 1e6 + created_at_ms`: larger `priority`
    /// sorts first (lower score), and within a priority tier the earlier
    /// `created_at` sorts first — FIFO.
    pub fn score(priority: i32, created_at: DateTime<Utc>) -> f64 {
        -(priority as f64) * 1_000_000.0 + created_at.timestamp_millis() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_sorts_first_fifo_within_tier() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(10);
        let high = Job::score(10, t0);
        let low_later = Job::score(1, t1);
        let low_earlier = Job::score(1, t0);
        assert!(high < low_earlier);
        assert!(low_earlier < low_later);
    }
}
