//! Instance Service: the intent façade. Validates
//! intents, deduplicates against the Operation Ledger, resolves instances
//! by id or name, writes the initial cache record, and enqueues the
//! appropriate job. Every Intent API operation is a method here;
//! `http::mod` binds them to Axum routes as a thin JSON layer.

mod validation;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::CacheManager;
use crate::config::{AutoStopConfig, HttpConfig, WorkerConfig};
use crate::controllers::reconciler::{ReconcileSummary, StartupReconciler};
use crate::error::AppError;
use crate::kv::{KvMode, KvStore};
use crate::ledger::{OperationKind, OperationLedger};
use crate::model::{Instance, InstanceConfig, InstanceStatus};
use crate::provider::{ProviderClient, ProviderInstance};
use crate::queue::model::{CreateInstancePayload, JobPayload, MonitorInstancePayload, SendWebhookPayload};
use crate::queue::JobQueue;
use crate::webhook::{SyntheticStatus, WebhookPayload};

use types::{
    AutoStopStats, CacheStatsEntry, CreateInstanceRequest, HealthReport, IntentResult, ListInstancesQuery,
    ListInstancesResult, ListSource, MetricsReport, StartInstanceOptions, WebhookOverride,
};

const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 5;
const WEBHOOK_JOB_MAX_ATTEMPTS: u32 = 3;
const AUTO_STOP_STATS_KEY: &str = "meta:auto_stop_stats";
const TIMESTAMP_SKEW_SECS: i64 = 300;

pub struct InstanceService {
    cache: Arc<CacheManager>,
    provider: Arc<ProviderClient>,
    queue: Arc<JobQueue>,
    ledger: Arc<OperationLedger>,
    kv: Arc<dyn KvStore>,
    reconciler: Arc<StartupReconciler>,
    default_region: String,
    allowed_regions: Vec<String>,
    startup_timeout: Duration,
    auto_stop_config: AutoStopConfig,
}

impl InstanceService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<CacheManager>,
        provider: Arc<ProviderClient>,
        queue: Arc<JobQueue>,
        ledger: Arc<OperationLedger>,
        kv: Arc<dyn KvStore>,
        reconciler: Arc<StartupReconciler>,
        http_config: &HttpConfig,
        worker_config: &WorkerConfig,
        auto_stop_config: AutoStopConfig,
    ) -> Self {
        Self {
            cache,
            provider,
            queue,
            ledger,
            kv,
            reconciler,
            default_region: http_config.default_region.clone(),
            allowed_regions: http_config.allowed_regions.clone(),
            startup_timeout: worker_config.instance_startup_timeout,
            auto_stop_config,
        }
    }

    async fn resolve_instance(&self, id_or_name: &str) -> Result<Instance, AppError> {
        if let Some(instance) = self.cache.instances.get(id_or_name).await? {
            return Ok(instance);
        }
        for key in self.cache.instances.keys().await? {
            if key == id_or_name {
                continue;
            }
            if let Some(instance) = self.cache.instances.get(&key).await? {
                if instance.name == id_or_name {
                    return Ok(instance);
                }
            }
        }
        Err(AppError::InstanceNotFound(id_or_name.to_string()))
    }

    async fn emit_async(&self, url: Option<&str>, payload: WebhookPayload) -> Result<(), AppError> {
        let Some(url) = url else { return Ok(()) };
        self.queue
            .enqueue(
                JobPayload::SendWebhook(SendWebhookPayload {
                    url: url.to_string(),
                    payload,
                }),
                0,
                WEBHOOK_JOB_MAX_ATTEMPTS,
            )
            .await?;
        Ok(())
    }

    /// `CreateInstance`. Writes the initial `creating`
    /// record and enqueues `create_instance`; the Lifecycle Controller
    /// drives the rest.
    pub async fn create_instance(&self, req: CreateInstanceRequest) -> Result<IntentResult, AppError> {
        validation::validate_name(&req.name)?;
        let region = req.region.clone().unwrap_or_else(|| self.default_region.clone());
        validation::validate_region(&region, &self.allowed_regions)?;
        let gpu_count = req.gpu_count.unwrap_or(1);
        validation::validate_gpu_count(gpu_count)?;
        let root_disk_gb = req.root_disk_gb.unwrap_or(60);
        validation::validate_root_disk_gb(root_disk_gb)?;

        if let Some(existing) = self.cache.instances.get(&req.name).await? {
            if !existing.status.is_terminated() && existing.status != InstanceStatus::Failed {
                return Err(AppError::Validation(format!("instance '{}' already exists", req.name)));
            }
        }

        let now = Utc::now();
        let instance = Instance {
            id: req.name.clone(),
            provider_id: None,
            name: req.name.clone(),
            status: InstanceStatus::Creating,
            product_id: String::new(),
            template_id: req.template_id.clone(),
            config: InstanceConfig {
                gpu_count,
                root_disk_gb,
                region: region.clone(),
                image_ref: String::new(),
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
            webhook_url: req.webhook_url.clone(),
            last_error: None,
            error_code: None,
            ip_address: None,
        };
        self.cache.instances.set(&instance.id, &instance, None).await?;

        let operation = self.ledger.begin(&instance.id, OperationKind::Start).await?;

        self.queue
            .enqueue(
                JobPayload::CreateInstance(CreateInstancePayload {
                    instance_id: instance.id.clone(),
                    product_name: req.product_name,
                    template_id: req.template_id,
                    region,
                    gpu_count,
                    root_disk_gb,
                    webhook_url: req.webhook_url,
                }),
                0,
                DEFAULT_JOB_MAX_ATTEMPTS,
            )
            .await?;

        Ok(IntentResult {
            instance_id: instance.id,
            provider_id: None,
            operation_id: Some(operation.operation_id),
            status: InstanceStatus::Creating,
            message: "instance creation accepted".to_string(),
            estimated_ready_time: Some(now + chrono::Duration::from_std(self.startup_timeout).unwrap_or_default()),
        })
    }

    /// `GetInstance`.
    pub async fn get_instance(&self, id_or_name: &str) -> Result<Instance, AppError> {
        self.resolve_instance(id_or_name).await
    }

    /// `ListInstances`: merges the local cache with an
    /// optional Provider snapshot depending on `source`.
    pub async fn list_instances(&self, query: ListInstancesQuery) -> Result<ListInstancesResult, AppError> {
        let local = self.load_all_cached_instances().await?;

        match query.source {
            ListSource::Local => {
                let total = local.len();
                Ok(ListInstancesResult {
                    instances: local,
                    total,
                    sources: Some(vec!["local".to_string()]),
                })
            }
            ListSource::Provider => {
                let snapshot = self.provider_snapshot().await?;
                let instances: Vec<Instance> = snapshot.iter().map(|p| self.to_instance(p, &local)).collect();
                if query.sync_local_state {
                    self.sync_cache_from_snapshot(&snapshot, &local).await?;
                }
                let total = instances.len();
                Ok(ListInstancesResult {
                    instances,
                    total,
                    sources: Some(vec!["provider".to_string()]),
                })
            }
            ListSource::All => {
                let snapshot = self.provider_snapshot().await?;
                let known_provider_ids: std::collections::HashSet<&str> =
                    local.iter().filter_map(|i| i.provider_id.as_deref()).collect();
                let mut instances = local.clone();
                if query.include_provider_only {
                    for p in &snapshot {
                        if !known_provider_ids.contains(p.provider_id.as_str()) {
                            instances.push(self.to_instance(p, &local));
                        }
                    }
                }
                if query.sync_local_state {
                    self.sync_cache_from_snapshot(&snapshot, &local).await?;
                }
                let total = instances.len();
                Ok(ListInstancesResult {
                    instances,
                    total,
                    sources: Some(vec!["local".to_string(), "provider".to_string()]),
                })
            }
        }
    }

    async fn load_all_cached_instances(&self) -> Result<Vec<Instance>, AppError> {
        let mut out = Vec::new();
        for key in self.cache.instances.keys().await? {
            if let Some(instance) = self.cache.instances.get(&key).await? {
                out.push(instance);
            }
        }
        Ok(out)
    }

    async fn provider_snapshot(&self) -> Result<Vec<ProviderInstance>, AppError> {
        let mut out = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.provider.list_instances(cursor.as_deref()).await?;
            out.extend(page.instances);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Builds a projection for a Provider-reported instance: the cached
    /// record refreshed with the Provider's status if one exists locally,
    /// otherwise a minimal record synthesized from the Provider alone
    /// (the `includeProviderOnly` listing mode).
    fn to_instance(&self, p: &ProviderInstance, local: &[Instance]) -> Instance {
        if let Some(existing) = local.iter().find(|i| i.provider_id.as_deref() == Some(p.provider_id.as_str())) {
            let mut refreshed = existing.clone();
            refreshed.status = InstanceStatus::from_provider_str(&p.status);
            refreshed.ip_address = p.ip_address.clone().or(refreshed.ip_address);
            return refreshed;
        }
        Instance {
            id: p.provider_id.clone(),
            provider_id: Some(p.provider_id.clone()),
            name: p.provider_id.clone(),
            status: InstanceStatus::from_provider_str(&p.status),
            product_id: String::new(),
            template_id: String::new(),
            config: InstanceConfig {
                gpu_count: 0,
                root_disk_gb: 0,
                region: String::new(),
                image_ref: String::new(),
                image_auth: None,
                ports: vec![],
                env_vars: HashMap::new(),
            },
            spot: p.spot_reclaimed,
            created_at: Utc::now(),
            started_at: None,
            ready_at: None,
            failed_at: None,
            last_used: None,
            last_synced: Some(Utc::now()),
            health_check: None,
            webhook_url: None,
            last_error: None,
            error_code: None,
            ip_address: p.ip_address.clone(),
        }
    }

    async fn sync_cache_from_snapshot(&self, snapshot: &[ProviderInstance], local: &[Instance]) -> Result<(), AppError> {
        for p in snapshot {
            let instance = self.to_instance(p, local);
            self.cache.instances.set(&instance.id, &instance, None).await?;
        }
        Ok(())
    }

    /// `StartInstance`. Requires `exited`/`stopped`;
    /// deduplicates via the Operation Ledger.
    pub async fn start_instance(&self, id_or_name: &str, opts: StartInstanceOptions) -> Result<IntentResult, AppError> {
        if let Some(config) = &opts.health_check_config {
            validation::validate_health_check_config(config)?;
        }
        if let Some(port) = opts.target_port {
            validation::validate_port(port)?;
        }

        let mut instance = self.resolve_instance(id_or_name).await?;

        if let Some(existing_op) = self.ledger.active(&instance.id, OperationKind::Start).await? {
            return Ok(IntentResult {
                instance_id: instance.id,
                provider_id: instance.provider_id,
                operation_id: Some(existing_op.operation_id),
                status: instance.status,
                message: "start already in progress".to_string(),
                estimated_ready_time: None,
            });
        }

        if !matches!(instance.status, InstanceStatus::Exited | InstanceStatus::Stopped) {
            return Err(AppError::InstanceNotStartable {
                id: instance.id.clone(),
                current_status: instance.status.to_string(),
                reason: "start requires status exited or stopped".to_string(),
            });
        }
        let Some(provider_id) = instance.provider_id.clone() else {
            return Err(AppError::InstanceNotStartable {
                id: instance.id.clone(),
                current_status: instance.status.to_string(),
                reason: "instance has no provider record to restart".to_string(),
            });
        };

        let operation = self.ledger.begin(&instance.id, OperationKind::Start).await?;
        self.provider.start_instance(&provider_id).await?;

        let now = Utc::now();
        instance.status = InstanceStatus::Starting;
        instance.started_at = Some(now);
        if opts.webhook_url.is_some() {
            instance.webhook_url = opts.webhook_url.clone();
        }
        if let Some(target_port) = opts.target_port {
            if let Some(health_check) = &mut instance.health_check {
                health_check.config.target_port = Some(target_port);
            }
        }
        self.cache.instances.set(&instance.id, &instance, None).await?;
        self.ledger
            .transition(&instance.id, OperationKind::Start, crate::ledger::OperationState::Monitoring)
            .await?;

        let max_wait_time_ms = opts
            .health_check_config
            .as_ref()
            .map(|c| c.max_wait_time_ms as i64)
            .unwrap_or(self.startup_timeout.as_millis() as i64);

        self.queue
            .enqueue(
                JobPayload::MonitorStartup(MonitorInstancePayload {
                    instance_id: instance.id.clone(),
                    provider_id: provider_id.clone(),
                    start_time: now,
                    max_wait_time_ms,
                    health_check_config: opts.health_check_config,
                    webhook_url: instance.webhook_url.clone(),
                    is_startup_monitor: true,
                    startup_initiated_emitted: false,
                    saw_partial_health: false,
                    pending_ready_confirmation: false,
                    ambiguous_polls: 0,
                }),
                0,
                DEFAULT_JOB_MAX_ATTEMPTS,
            )
            .await?;

        Ok(IntentResult {
            instance_id: instance.id,
            provider_id: Some(provider_id),
            operation_id: Some(operation.operation_id),
            status: InstanceStatus::Starting,
            message: "start accepted".to_string(),
            estimated_ready_time: Some(now + chrono::Duration::from_std(self.startup_timeout).unwrap_or_default()),
        })
    }

    /// `StopInstance`. Synchronous Provider call — there is no
    /// `stop_instance` job type, so the façade calls the Provider directly
    /// and reports the outcome immediately rather than handing off to the
    /// Worker Pool.
    pub async fn stop_instance(&self, id_or_name: &str, opts: WebhookOverride) -> Result<IntentResult, AppError> {
        let mut instance = self.resolve_instance(id_or_name).await?;

        if let Some(existing_op) = self.ledger.active(&instance.id, OperationKind::Stop).await? {
            return Ok(IntentResult {
                instance_id: instance.id,
                provider_id: instance.provider_id,
                operation_id: Some(existing_op.operation_id),
                status: instance.status,
                message: "stop already in progress".to_string(),
                estimated_ready_time: None,
            });
        }
        let Some(provider_id) = instance.provider_id.clone() else {
            return Err(AppError::Validation(format!("instance '{}' has no provider record to stop", instance.id)));
        };

        let operation = self.ledger.begin(&instance.id, OperationKind::Stop).await?;
        self.provider.stop_instance(&provider_id).await?;

        instance.status = InstanceStatus::Stopped;
        if opts.webhook_url.is_some() {
            instance.webhook_url = opts.webhook_url.clone();
        }
        self.cache.instances.set(&instance.id, &instance, None).await?;
        self.ledger
            .transition(&instance.id, OperationKind::Stop, crate::ledger::OperationState::Completed)
            .await?;

        self.emit_async(
            instance.webhook_url.as_deref(),
            WebhookPayload {
                instance_id: instance.id.clone(),
                status: "stopped".to_string(),
                timestamp: Utc::now(),
                novita_instance_id: Some(provider_id.clone()),
                elapsed_time: None,
                error: None,
                reason: None,
                startup_operation: None,
                health_check: None,
                data: None,
            },
        )
        .await?;

        Ok(IntentResult {
            instance_id: instance.id,
            provider_id: Some(provider_id),
            operation_id: Some(operation.operation_id),
            status: InstanceStatus::Stopped,
            message: "instance stopped".to_string(),
            estimated_ready_time: None,
        })
    }

    /// `DeleteInstance`. An instance never created at
    /// the Provider (`providerId` absent) cannot be deleted there; only
    /// the local record is cleared.
    pub async fn delete_instance(&self, id_or_name: &str, opts: WebhookOverride) -> Result<IntentResult, AppError> {
        let instance = self.resolve_instance(id_or_name).await?;

        let Some(provider_id) = instance.provider_id.clone() else {
            self.cache.instances.delete(&instance.id).await?;
            return Ok(IntentResult {
                instance_id: instance.id,
                provider_id: None,
                operation_id: None,
                status: InstanceStatus::Terminated,
                message: "instance had no provider record; local entry cleared".to_string(),
                estimated_ready_time: None,
            });
        }

        if let Some(existing_op) = self.ledger.active(&instance.id, OperationKind::Delete).await? {
            return Ok(IntentResult {
                instance_id: instance.id,
                provider_id: Some(provider_id),
                operation_id: Some(existing_op.operation_id),
                status: instance.status,
                message: "delete already in progress".to_string(),
                estimated_ready_time: None,
            });
        }

        let operation = self.ledger.begin(&instance.id, OperationKind::Delete).await?;
        self.provider.delete_instance(&provider_id).await?;
        self.ledger
            .transition(&instance.id, OperationKind::Delete, crate::ledger::OperationState::Completed)
            .await?;

        let webhook_url = opts.webhook_url.or(instance.webhook_url.clone());
        self.emit_async(
            webhook_url.as_deref(),
            WebhookPayload {
                instance_id: instance.id.clone(),
                status: SyntheticStatus::Deleted.as_str().to_string(),
                timestamp: Utc::now(),
                novita_instance_id: Some(provider_id.clone()),
                elapsed_time: None,
                error: None,
                reason: None,
                startup_operation: None,
                health_check: None,
                data: None,
            },
        )
        .await?;

        self.cache.instances.delete(&instance.id).await?;

        Ok(IntentResult {
            instance_id: instance.id,
            provider_id: Some(provider_id),
            operation_id: Some(operation.operation_id),
            status: InstanceStatus::Terminated,
            message: "instance deleted".to_string(),
            estimated_ready_time: None,
        })
    }

    /// `UpdateLastUsed`. Explicit half of the `lastUsed`
    /// policy decided for the Auto-Stop Controller; the other half
    /// (automatic refresh on readiness) lives in
    /// [`crate::model::Instance::mark_ready`].
    pub async fn update_last_used(&self, id_or_name: &str, at: Option<DateTime<Utc>>) -> Result<(), AppError> {
        let mut instance = self.resolve_instance(id_or_name).await?;
        instance.last_used = Some(at.unwrap_or_else(Utc::now));
        self.cache.instances.set(&instance.id, &instance, None).await?;
        Ok(())
    }

    /// `TriggerAutoStop`: runs one scan immediately,
    /// honoring the caller's `dryRun` override rather than the
    /// configured default.
    pub async fn trigger_auto_stop(&self, dry_run: bool) -> Result<AutoStopStats, AppError> {
        let mut effective = self.auto_stop_config.clone();
        effective.dry_run = dry_run;
        self.run_auto_stop_scan(&effective).await
    }

    /// `GetAutoStopStats`: the most recent scan's summary,
    /// whether it ran from the ticker or a manual trigger.
    pub async fn get_auto_stop_stats(&self) -> Result<AutoStopStats, AppError> {
        match self.kv.get(AUTO_STOP_STATS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).map_err(|e| AppError::Internal(e.to_string()))?),
            None => Ok(AutoStopStats {
                last_run_at: None,
                scanned: 0,
                idle: 0,
                stopped: 0,
                dry_run: config_default_dry_run(),
                candidates: vec![],
            }),
        }
    }

    /// The scan itself, shared by the periodic ticker's
    /// enqueued job and by `TriggerAutoStop`.
    pub async fn run_auto_stop_scan(&self, config: &AutoStopConfig) -> Result<AutoStopStats, AppError> {
        let now = Utc::now();
        let skew = chrono::Duration::seconds(TIMESTAMP_SKEW_SECS);
        let threshold = chrono::Duration::from_std(config.idle_threshold).unwrap_or_default();

        let mut scanned = 0usize;
        let mut idle = 0usize;
        let mut stopped = 0usize;
        let mut candidates = Vec::new();

        for key in self.cache.instances.keys().await? {
            let Some(mut instance) = self.cache.instances.get(&key).await? else {
                continue;
            };
            if !instance.status.is_reclaimable() {
                continue;
            }
            scanned += 1;

            if instance.created_at > now + skew {
                tracing::warn!(instance_id = %instance.id, "skipping instance with unrepairable future created_at");
                continue;
            }
            let mut repaired = false;
            if instance.last_used.is_some_and(|t| t > now + skew) {
                instance.last_used = Some(instance.created_at);
                repaired = true;
            }
            if repaired {
                self.cache.instances.set(&key, &instance, None).await?;
            }

            if now - instance.effective_last_used() >= threshold {
                idle += 1;
                candidates.push(instance.id.clone());
                if !config.dry_run && self.ledger.active(&instance.id, OperationKind::Stop).await?.is_none() {
                    match self.stop_instance(&instance.id, WebhookOverride::default()).await {
                        Ok(_) => stopped += 1,
                        Err(e) => tracing::warn!(instance_id = %instance.id, error = %e, "auto-stop failed for instance"),
                    }
                }
            }
        }

        let stats = AutoStopStats {
            last_run_at: Some(now),
            scanned,
            idle,
            stopped,
            dry_run: config.dry_run,
            candidates,
        };
        let raw = serde_json::to_string(&stats).map_err(|e| AppError::Internal(e.to_string()))?;
        self.kv.set(AUTO_STOP_STATS_KEY, &raw, None).await?;
        Ok(stats)
    }

    /// `SyncNow`: runs the Startup Reconciler's pass
    /// on demand, outside its one-shot boot invocation.
    pub async fn sync_now(&self) -> Result<ReconcileSummary, AppError> {
        Ok(self.reconciler.run().await?)
    }

    /// `StopAll`: stops every `ready`/`running` instance
    /// regardless of idle time. Per-instance failures are collected, not
    /// aborting the remaining instances.
    pub async fn stop_all(&self) -> Result<Vec<IntentResult>, AppError> {
        let mut results = Vec::new();
        for instance in self.load_all_cached_instances().await? {
            if !instance.status.is_reclaimable() {
                continue;
            }
            match self.stop_instance(&instance.id, WebhookOverride::default()).await {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(instance_id = %instance.id, error = %e, "stop_all failed for instance"),
            }
        }
        Ok(results)
    }

    /// `GetCacheStats`.
    pub async fn get_cache_stats(&self) -> Result<Vec<CacheStatsEntry>, AppError> {
        Ok(vec![
            CacheStatsEntry {
                name: "instances".to_string(),
                size: self.cache.instances.size().await?,
            },
            CacheStatsEntry {
                name: "products".to_string(),
                size: self.cache.products.size().await?,
            },
            CacheStatsEntry {
                name: "templates".to_string(),
                size: self.cache.templates.size().await?,
            },
        ])
    }

    /// `ClearCache{cacheName?}`: clears one named cache, or
    /// all three when `cache_name` is absent.
    pub async fn clear_cache(&self, cache_name: Option<&str>) -> Result<(), AppError> {
        match cache_name {
            Some("instances") => self.cache.instances.clear().await?,
            Some("products") => self.cache.products.clear().await?,
            Some("templates") => self.cache.templates.clear().await?,
            Some(other) => return Err(AppError::Validation(format!("unknown cache name '{other}'"))),
            None => {
                self.cache.instances.clear().await?;
                self.cache.products.clear().await?;
                self.cache.templates.clear().await?;
            }
        }
        Ok(())
    }

    /// `HardReset`: destructive purge of the whole KV
    /// namespace this process owns. Limited to the key families the
    /// [`crate::kv::KvStore`] trait actually exposes a scan for (`cache:`,
    /// `job:`, `op:`) plus the fixed queue keys; process-local locks are
    /// intentionally left to expire on their own TTL rather than forced
    /// open here.
    pub async fn hard_reset(&self) -> Result<(), AppError> {
        for prefix in ["cache:", "job:", "op:"] {
            for key in self.kv.scan_prefix(prefix).await? {
                self.kv.del(&key).await?;
            }
        }
        for key in ["queue:pending", "queue:processing", "queue:delayed", "queue:completed", "queue:failed"] {
            self.kv.del(key).await?;
        }
        Ok(())
    }

    /// `GetHealth`.
    pub async fn get_health(&self) -> Result<HealthReport, AppError> {
        Ok(HealthReport {
            kv_mode: format!("{:?}", self.kv.mode()),
            kv_degraded: matches!(self.kv.mode(), KvMode::Fallback),
            circuit_state: format!("{:?}", self.provider.circuit_state()),
            queue_pending: self.queue.pending_count().await?,
            queue_processing: self.queue.processing_count().await?,
        })
    }

    /// `GetMetrics`.
    pub async fn get_metrics(&self) -> Result<MetricsReport, AppError> {
        Ok(MetricsReport {
            queue_pending: self.queue.pending_count().await?,
            queue_processing: self.queue.processing_count().await?,
            instances_cached: self.cache.instances.size().await?,
            circuit_state: format!("{:?}", self.provider.circuit_state()),
        })
    }
}

fn config_default_dry_run() -> bool {
    true
}
