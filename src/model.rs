//! Core data model: instances, their config, and health-check state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a GPU instance.
///
/// `terminated` is absorbing. `ready` is reachable only through
/// `health_checking` (see [`Instance::can_transition_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Creating,
    Created,
    Starting,
    Running,
    HealthChecking,
    Ready,
    Stopping,
    Stopped,
    Exited,
    Failed,
    Terminated,
}

impl InstanceStatus {
    /// `true` for the absorbing terminal state.
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// `true` for states the Auto-Stop Controller considers for idle reclaim.
    pub fn is_reclaimable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Maps a raw Provider status string onto the local enum, for the
    /// Startup Reconciler's cache-upsert pass and for synthesizing
    /// minimal records for Provider-only instances. Unrecognized strings
    /// map to `Failed` rather than panicking — the reconciler must never
    /// abort a whole reconciliation over one odd status value.
    pub fn from_provider_str(status: &str) -> Self {
        match status {
            "creating" => Self::Creating,
            "created" => Self::Created,
            "starting" => Self::Starting,
            "running" => Self::Running,
            "health_checking" => Self::HealthChecking,
            "ready" => Self::Ready,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "exited" => Self::Exited,
            "terminated" => Self::Terminated,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "{s}")
    }
}

/// Per-instance provisioning config, resolved from the product + template
/// at create time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub gpu_count: u32,
    pub root_disk_gb: u32,
    pub region: String,
    pub image_ref: String,
    pub image_auth: Option<String>,
    pub ports: Vec<u16>,
    pub env_vars: HashMap<String, String>,
}

/// Status of the application-level health check attached to a start operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_wait_time_ms: u64,
    pub target_port: Option<u16>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_attempts: 3,
            retry_delay_ms: 500,
            max_wait_time_ms: 300_000,
            target_port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckState {
    pub status: HealthCheckStatus,
    pub config: HealthCheckConfig,
    pub last_result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The instance record as cached/persisted.
///
/// Invariants enforced by callers (not re-checked on every read):
/// - `status == Ready` implies `provider_id.is_some()`, the last probe
///   verdict was healthy, and `ready_at` is set.
/// - `running -> ready` passes through `health_checking`.
/// - `terminated` is never left.
/// - `last_used <= now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub provider_id: Option<String>,
    pub name: String,
    pub status: InstanceStatus,
    pub product_id: String,
    pub template_id: String,
    pub config: InstanceConfig,
    /// `true` when provisioned on spot/preemptible capacity; read by the
    /// Migration Controller's eligibility check.
    pub spot: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
    pub health_check: Option<HealthCheckState>,
    pub webhook_url: Option<String>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    /// Reachable address reported by the Provider once running; feeds
    /// [`Instance::health_endpoints`].
    pub ip_address: Option<String>,
}

impl Instance {
    /// `lastUsed`, falling back to `created` when absent, per the
    /// Auto-Stop Controller's documented default.
    pub fn effective_last_used(&self) -> DateTime<Utc> {
        self.last_used.unwrap_or(self.created_at)
    }

    /// Builds the Health Prober's endpoint list from this instance's
    /// configured ports and its Provider-reported address. Empty until
    /// `ip_address` is known (before the Provider reports `running`).
    pub fn health_endpoints(&self) -> Vec<crate::health::EndpointSpec> {
        let Some(ip) = &self.ip_address else {
            return vec![];
        };
        self.config
            .ports
            .iter()
            .map(|port| crate::health::EndpointSpec {
                port: *port,
                endpoint_url: format!("http://{ip}:{port}/"),
                endpoint_type: "http".to_string(),
            })
            .collect()
    }

    /// Refreshes `last_used` unconditionally, not just on the first
    /// transition: a restarted instance reaching `ready` again has no
    /// client traffic yet either, and should not look idle from a stale
    /// timestamp left over from its previous run.
    pub fn mark_ready(&mut self, now: DateTime<Utc>) {
        self.status = InstanceStatus::Ready;
        self.ready_at = Some(now);
        self.last_used = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.status = InstanceStatus::Failed;
        self.failed_at = Some(now);
        self.last_error = Some(reason.into());
    }
}

/// Instance name validation: 1-100 chars, `[A-Za-z0-9_-]`.
pub fn is_valid_instance_name(name: &str) -> bool {
    let len_ok = !name.is_empty() && name.len() <= 100;
    len_ok
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_boundaries() {
        assert!(is_valid_instance_name("a"));
        assert!(is_valid_instance_name(&"a".repeat(100)));
        assert!(!is_valid_instance_name(&"a".repeat(101)));
        assert!(!is_valid_instance_name(""));
        assert!(!is_valid_instance_name("bad name"));
        assert!(is_valid_instance_name("exp-1_2"));
    }

    #[test]
    fn effective_last_used_falls_back_to_created() {
        let now = Utc::now();
        let inst = Instance {
            id: "i-1".into(),
            provider_id: None,
            name: "x".into(),
            status: InstanceStatus::Created,
            product_id: "p".into(),
            template_id: "t".into(),
            config: InstanceConfig {
                gpu_count: 1,
                root_disk_gb: 60,
                region: "CN-HK-01".into(),
                image_ref: "img".into(),
                image_auth: None,
                ports: vec![],
                env_vars: HashMap::new(),
            },
            spot: false,
            created_at: now,
            started_at: None,
            ready_at: None,
            failed_at: None,
            last_used: None,
            last_synced: None,
            health_check: None,
            webhook_url: None,
            last_error: None,
            error_code: None,
            ip_address: None,
        };
        assert_eq!(inst.effective_last_used(), now);
    }
}
