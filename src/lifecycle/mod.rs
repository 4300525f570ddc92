//! Lifecycle Controller: the create/start state machine.
//! Owns polling cadence, status transitions, and webhook emission. The
//! `create_instance` and `monitor_instance`/`monitor_startup` Worker Pool
//! handlers are thin adapters over the methods here, so the state machine
//! itself is unit-testable without a queue.

mod errors;

pub use errors::LifecycleError;

use std::sync::Arc;

use chrono::Utc;

use crate::cache::CacheManager;
use crate::config::WorkerConfig;
use crate::health::{HealthProber, Verdict};
use crate::ledger::{OperationKind, OperationLedger, OperationState};
use crate::model::{HealthCheckConfig, HealthCheckState, HealthCheckStatus, Instance, InstanceStatus};
use crate::provider::{CreateInstanceRequest, ProviderClient};
use crate::queue::model::{CreateInstancePayload, MonitorInstancePayload};
use crate::webhook::{SyntheticStatus, WebhookDispatcher, WebhookPayload};

/// What the Worker Pool handler should do after one `monitor_instance` /
/// `monitor_startup` execution.
pub enum MonitorOutcome {
    /// Re-enqueue another poll after `poll_interval`, with the updated
    /// payload (tie-break flags, ambiguous-poll counter).
    Continue(MonitorInstancePayload),
    /// The instance reached `ready`; the operation is complete.
    Ready,
    /// The instance is in a terminal, non-ready state (timeout, explicit
    /// failure, or absorbing `terminated`).
    Failed { status: InstanceStatus, reason: String, synthetic: SyntheticStatus },
}

pub struct LifecycleController {
    provider: Arc<ProviderClient>,
    cache: Arc<CacheManager>,
    prober: Arc<HealthProber>,
    webhooks: Arc<WebhookDispatcher>,
    ledger: Arc<OperationLedger>,
    worker_config: WorkerConfig,
}

impl LifecycleController {
    pub fn new(
        provider: Arc<ProviderClient>,
        cache: Arc<CacheManager>,
        prober: Arc<HealthProber>,
        webhooks: Arc<WebhookDispatcher>,
        ledger: Arc<OperationLedger>,
        worker_config: WorkerConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            prober,
            webhooks,
            ledger,
            worker_config,
        }
    }

    async fn load_instance(&self, instance_id: &str) -> Result<Instance, LifecycleError> {
        self.cache
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| LifecycleError::Terminal(format!("instance '{instance_id}' missing from cache")))
    }

    async fn save_instance(&self, instance: &Instance) -> Result<(), LifecycleError> {
        self.cache.instances.set(&instance.id, instance, None).await?;
        Ok(())
    }

    async fn emit(&self, instance: &Instance, status: &str, extra: WebhookExtras) {
        let Some(url) = instance.webhook_url.as_ref() else { return };
        let payload = WebhookPayload {
            instance_id: instance.id.clone(),
            status: status.to_string(),
            timestamp: Utc::now(),
            novita_instance_id: instance.provider_id.clone(),
            elapsed_time: extra.elapsed_time_ms,
            error: extra.error,
            reason: extra.reason,
            startup_operation: extra.startup_operation,
            health_check: None,
            data: None,
        };
        self.webhooks.deliver(url, &payload).await;
    }

    /// Step 1-5 of the create flow: resolve product and
    /// template, create at the Provider, start it, and return the
    /// `monitor_instance` payload the caller should enqueue next.
    pub async fn create(&self, payload: &CreateInstancePayload) -> Result<MonitorInstancePayload, LifecycleError> {
        let mut instance = self.load_instance(&payload.instance_id).await?;

        let product = self.resolve_product(&payload.product_name, &payload.region).await?;
        let template = self.resolve_template(&payload.template_id).await?;

        let request = CreateInstanceRequest {
            product_id: product.id.clone(),
            gpu_count: payload.gpu_count,
            root_disk_gb: payload.root_disk_gb,
            region: payload.region.clone(),
            image_ref: template.image_ref.clone(),
            image_auth: template.image_auth.clone(),
            ports: template.ports.clone(),
            env_vars: template.env_vars.clone(),
        };
        let created = self.provider.create_instance(&request).await?;

        instance.provider_id = Some(created.provider_id.clone());
        instance.product_id = product.id.clone();
        instance.status = InstanceStatus::Created;
        instance.config.image_ref = template.image_ref.clone();
        instance.config.image_auth = template.image_auth.clone();
        instance.config.ports = template.ports.clone();
        instance.config.env_vars = template.env_vars.clone();
        self.save_instance(&instance).await?;

        self.provider.start_instance(&created.provider_id).await?;
        instance.status = InstanceStatus::Starting;
        instance.started_at = Some(Utc::now());
        self.save_instance(&instance).await?;

        self.ledger
            .transition(&instance.id, OperationKind::Start, OperationState::Monitoring)
            .await?;

        Ok(MonitorInstancePayload {
            instance_id: instance.id.clone(),
            provider_id: created.provider_id,
            start_time: Utc::now(),
            max_wait_time_ms: self.worker_config.instance_startup_timeout.as_millis() as i64,
            health_check_config: None,
            webhook_url: instance.webhook_url.clone(),
            is_startup_monitor: false,
            startup_initiated_emitted: false,
            saw_partial_health: false,
            pending_ready_confirmation: false,
            ambiguous_polls: 0,
        })
    }

    async fn resolve_product(&self, product_name: &str, region: &str) -> Result<crate::provider::Product, LifecycleError> {
        let cache_key = format!("{product_name}:{region}");
        if let Some(cached) = self.cache.products.get(&cache_key).await? {
            return Ok(cached);
        }
        let filter = format!("name={product_name}&region={region}");
        let candidates = self.provider.list_products(&filter).await?;
        let chosen = candidates
            .into_iter()
            .filter(|p| p.region == region)
            .min_by(|a, b| a.spot_price.total_cmp(&b.spot_price))
            .ok_or_else(|| LifecycleError::NoMatchingProduct(product_name.to_string()))?;
        self.cache.products.set(&cache_key, &chosen, None).await?;
        Ok(chosen)
    }

    async fn resolve_template(&self, template_id: &str) -> Result<crate::provider::Template, LifecycleError> {
        if let Some(cached) = self.cache.templates.get(template_id).await? {
            return Ok(cached);
        }
        let template = self.provider.get_template(template_id).await?;
        self.cache.templates.set(template_id, &template, None).await?;
        Ok(template)
    }

    /// One poll cycle of `monitor_instance` / `monitor_startup`.
    /// `monitor_startup` differs only in emitting `startup_initiated`
    /// before the very first poll.
    pub async fn monitor(&self, payload: MonitorInstancePayload) -> Result<MonitorOutcome, LifecycleError> {
        let mut instance = self.load_instance(&payload.instance_id).await?;

        let mut payload = payload;
        if payload.is_startup_monitor && !payload.startup_initiated_emitted {
            self.emit(&instance, "startup_initiated", WebhookExtras::default()).await;
            payload.startup_initiated_emitted = true;
        }

        let elapsed_ms = (Utc::now() - payload.start_time).num_milliseconds();
        if elapsed_ms > payload.max_wait_time_ms {
            instance.mark_failed(Utc::now(), "startup exceeded max wait time");
            self.save_instance(&instance).await?;
            self.ledger
                .fail(&instance.id, OperationKind::Start, "timeout")
                .await?;
            self.emit(
                &instance,
                SyntheticStatus::Timeout.as_str(),
                WebhookExtras {
                    elapsed_time: Some(elapsed_ms),
                    error: Some("timeout".to_string()),
                    ..Default::default()
                },
            )
            .await;
            return Ok(MonitorOutcome::Failed {
                status: InstanceStatus::Failed,
                reason: "timeout".to_string(),
                synthetic: SyntheticStatus::Timeout,
            });
        }

        let provider_state = self.provider.get_instance(&payload.provider_id).await?;

        match provider_state.status.as_str() {
            "starting" => {
                instance.status = InstanceStatus::Starting;
                self.save_instance(&instance).await?;
                Ok(MonitorOutcome::Continue(MonitorInstancePayload {
                    ambiguous_polls: 0,
                    ..payload
                }))
            }
            "running" => {
                instance.status = InstanceStatus::HealthChecking;
                instance.ip_address = provider_state.ip_address.clone();
                self.ledger
                    .transition(&instance.id, OperationKind::Start, OperationState::HealthChecking)
                    .await?;
                self.run_health_check(&mut instance, payload, elapsed_ms).await
            }
            "failed" => {
                instance.mark_failed(Utc::now(), "provider reported failed");
                self.save_instance(&instance).await?;
                self.ledger.fail(&instance.id, OperationKind::Start, "provider failed").await?;
                self.emit(
                    &instance,
                    SyntheticStatus::StartupFailed.as_str(),
                    WebhookExtras {
                        error: Some("provider reported failed".to_string()),
                        ..Default::default()
                    },
                )
                .await;
                Ok(MonitorOutcome::Failed {
                    status: InstanceStatus::Failed,
                    reason: "provider reported failed".to_string(),
                    synthetic: SyntheticStatus::StartupFailed,
                })
            }
            "exited" | "terminated" => {
                instance.status = InstanceStatus::Terminated;
                self.save_instance(&instance).await?;
                self.ledger
                    .fail(&instance.id, OperationKind::Start, "provider instance terminated during startup")
                    .await?;
                self.emit(
                    &instance,
                    SyntheticStatus::StartupFailed.as_str(),
                    WebhookExtras {
                        error: Some("instance terminated during startup".to_string()),
                        ..Default::default()
                    },
                )
                .await;
                Ok(MonitorOutcome::Failed {
                    status: InstanceStatus::Terminated,
                    reason: "instance terminated during startup".to_string(),
                    synthetic: SyntheticStatus::StartupFailed,
                })
            }
            other => {
                // Ambiguous status: re-poll once before declaring failure.
                if payload.ambiguous_polls == 0 {
                    Ok(MonitorOutcome::Continue(MonitorInstancePayload {
                        ambiguous_polls: payload.ambiguous_polls + 1,
                        ..payload
                    }))
                } else {
                    let reason = format!("unrecognized provider status '{other}'");
                    instance.mark_failed(Utc::now(), reason.clone());
                    self.save_instance(&instance).await?;
                    self.ledger.fail(&instance.id, OperationKind::Start, reason.clone()).await?;
                    self.emit(
                        &instance,
                        SyntheticStatus::StartupFailed.as_str(),
                        WebhookExtras {
                            error: Some(reason.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                    Ok(MonitorOutcome::Failed {
                        status: InstanceStatus::Failed,
                        reason,
                        synthetic: SyntheticStatus::StartupFailed,
                    })
                }
            }
        }
    }

    async fn run_health_check(
        &self,
        instance: &mut Instance,
        payload: MonitorInstancePayload,
        elapsed_ms: i64,
    ) -> Result<MonitorOutcome, LifecycleError> {
        let config = payload.health_check_config.clone().unwrap_or_default();
        let endpoints = instance.health_endpoints();
        let report = self.prober.probe(&endpoints, &config, elapsed_ms).await;

        let mut health_state = instance.health_check.clone().unwrap_or(HealthCheckState {
            status: HealthCheckStatus::InProgress,
            config: config.clone(),
            last_result: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        });
        health_state.last_result = Some(format!("{:?}", report.verdict));

        match report.verdict {
            Verdict::Healthy => {
                // A partial verdict seen earlier requires one further
                // confirming healthy poll before promotion.
                if payload.saw_partial_health && !payload.pending_ready_confirmation {
                    instance.health_check = Some(health_state);
                    self.save_instance(instance).await?;
                    return Ok(MonitorOutcome::Continue(MonitorInstancePayload {
                        pending_ready_confirmation: true,
                        ambiguous_polls: 0,
                        ..payload
                    }));
                }
                health_state.status = HealthCheckStatus::Completed;
                health_state.completed_at = Some(Utc::now());
                instance.health_check = Some(health_state);
                instance.mark_ready(Utc::now());
                self.save_instance(instance).await?;
                self.ledger
                    .transition(&instance.id, OperationKind::Start, OperationState::Completed)
                    .await?;
                self.emit(
                    instance,
                    "ready",
                    WebhookExtras {
                        elapsed_time: Some(elapsed_ms),
                        ..Default::default()
                    },
                )
                .await;
                Ok(MonitorOutcome::Ready)
            }
            Verdict::Partial => {
                instance.health_check = Some(health_state);
                self.save_instance(instance).await?;
                Ok(MonitorOutcome::Continue(MonitorInstancePayload {
                    saw_partial_health: true,
                    pending_ready_confirmation: false,
                    ambiguous_polls: 0,
                    ..payload
                }))
            }
            Verdict::Unhealthy => {
                health_state.status = HealthCheckStatus::Failed;
                health_state.completed_at = Some(Utc::now());
                instance.health_check = Some(health_state);
                instance.mark_failed(Utc::now(), "health check deadline exceeded without a healthy verdict");
                self.save_instance(instance).await?;
                self.ledger
                    .fail(&instance.id, OperationKind::Start, "health check timeout")
                    .await?;
                self.emit(
                    instance,
                    SyntheticStatus::Timeout.as_str(),
                    WebhookExtras {
                        elapsed_time: Some(elapsed_ms),
                        error: Some("health check timeout".to_string()),
                        ..Default::default()
                    },
                )
                .await;
                Ok(MonitorOutcome::Failed {
                    status: InstanceStatus::Failed,
                    reason: "health check timeout".to_string(),
                    synthetic: SyntheticStatus::Timeout,
                })
            }
        }
    }

}

#[derive(Default)]
struct WebhookExtras {
    elapsed_time_ms: Option<i64>,
    error: Option<String>,
    reason: Option<String>,
    startup_operation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::health::HealthProber;
    use crate::kv::memory::MemoryStore;
    use crate::model::InstanceConfig;
    use crate::webhook::WebhookConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 4,
            poll_interval: Duration::from_secs(30),
            instance_startup_timeout: Duration::from_secs(1_800),
            job_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    fn bare_instance(id: &str) -> Instance {
        Instance {
            id: id.to_string(),
            provider_id: Some("p-1".to_string()),
            name: id.to_string(),
            status: InstanceStatus::Starting,
            product_id: "prod-1".to_string(),
            template_id: "tmpl-1".to_string(),
            config: InstanceConfig {
                gpu_count: 1,
                root_disk_gb: 60,
                region: "CN-HK-01".to_string(),
                image_ref: "img".to_string(),
                image_auth: None,
                ports: vec![],
                env_vars: HashMap::new(),
            },
            spot: false,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ready_at: None,
            failed_at: None,
            last_used: None,
            last_synced: None,
            health_check: None,
            webhook_url: None,
            last_error: None,
            error_code: None,
            ip_address: None,
        }
    }

    fn monitor_payload(instance_id: &str) -> MonitorInstancePayload {
        MonitorInstancePayload {
            instance_id: instance_id.to_string(),
            provider_id: "p-1".to_string(),
            start_time: Utc::now(),
            max_wait_time_ms: 60_000,
            health_check_config: Some(HealthCheckConfig {
                timeout_ms: 1_000,
                retry_attempts: 0,
                retry_delay_ms: 1,
                max_wait_time_ms: 60_000,
                target_port: None,
            }),
            webhook_url: None,
            is_startup_monitor: false,
            startup_initiated_emitted: false,
            saw_partial_health: false,
            pending_ready_confirmation: false,
            ambiguous_polls: 0,
        }
    }

    fn controller() -> (LifecycleController, Arc<CacheManager>) {
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheManager::initialize(Arc::clone(&kv)));
        let provider_config = crate::config::ProviderConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            internal_base_url: "http://127.0.0.1:1".to_string(),
            api_key: secrecy::SecretString::from("k".to_string()),
            internal_api_key: secrecy::SecretString::from("k".to_string()),
            request_timeout: Duration::from_millis(100),
            max_retry_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_cap_delay: Duration::from_millis(2),
            rate_limit_capacity: 1000,
            rate_limit_window: Duration::from_millis(1),
            circuit_failure_threshold: 100,
            circuit_open_duration: Duration::from_secs(1),
            circuit_half_open_successes: 1,
        };
        let provider = Arc::new(ProviderClient::new(provider_config));
        let prober = Arc::new(HealthProber::new());
        let webhooks = Arc::new(WebhookDispatcher::new(WebhookConfig {
            secret: None,
            timeout: Duration::from_millis(100),
            max_attempts: 1,
        }));
        let ledger = Arc::new(OperationLedger::new(kv));
        let lifecycle = LifecycleController::new(provider, Arc::clone(&cache), prober, webhooks, ledger, worker_config());
        (lifecycle, cache)
    }

    #[tokio::test]
    async fn monitor_times_out_past_max_wait() {
        let (lifecycle, cache) = controller();
        let instance = bare_instance("i-1");
        cache.instances.set("i-1", &instance, None).await.unwrap();

        let mut payload = monitor_payload("i-1");
        payload.start_time = Utc::now() - chrono::Duration::milliseconds(120_000);
        payload.max_wait_time_ms = 60_000;

        let outcome = lifecycle.monitor(payload).await.unwrap();
        match outcome {
            MonitorOutcome::Failed { status, .. } => assert_eq!(status, InstanceStatus::Failed),
            _ => panic!("expected timeout failure"),
        }
        let saved = cache.instances.get("i-1").await.unwrap().unwrap();
        assert_eq!(saved.status, InstanceStatus::Failed);
    }
}
