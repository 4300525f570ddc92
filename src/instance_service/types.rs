//! Request/response shapes for the Intent API. These are
//! the façade's own DTOs, independent of the cached [`crate::model::Instance`]
//! representation, so the wire shape can evolve without touching storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{HealthCheckConfig, Instance, InstanceStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub product_name: String,
    pub template_id: String,
    pub gpu_count: Option<u32>,
    pub root_disk_gb: Option<u32>,
    pub region: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentResult {
    pub instance_id: String,
    pub provider_id: Option<String>,
    pub operation_id: Option<String>,
    pub status: InstanceStatus,
    pub message: String,
    pub estimated_ready_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartInstanceOptions {
    pub health_check_config: Option<HealthCheckConfig>,
    pub target_port: Option<u16>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookOverride {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListSource {
    All,
    Local,
    Provider,
}

impl Default for ListSource {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInstancesQuery {
    #[serde(default)]
    pub source: ListSource,
    #[serde(default)]
    pub include_provider_only: bool,
    #[serde(default)]
    pub sync_local_state: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListInstancesResult {
    pub instances: Vec<Instance>,
    pub total: usize,
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoStopStats {
    pub last_run_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub idle: usize,
    pub stopped: usize,
    pub dry_run: bool,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsEntry {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub kv_mode: String,
    pub kv_degraded: bool,
    pub circuit_state: String,
    pub queue_pending: u64,
    pub queue_processing: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub queue_pending: u64,
    pub queue_processing: u64,
    pub instances_cached: usize,
    pub circuit_state: String,
}
