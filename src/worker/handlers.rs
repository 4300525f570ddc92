//! Concrete [`JobHandler`] implementations. Each is a thin adapter over a
//! domain component (Lifecycle Controller, Provider Client, Webhook
//! Dispatcher) — the state machine logic itself lives there, not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::WorkerConfig;
use crate::ledger::{OperationKind, OperationLedger, OperationState};
use crate::lifecycle::{LifecycleController, MonitorOutcome};
use crate::provider::ProviderClient;
use crate::queue::model::{Job, JobPayload, JobType};
use crate::queue::JobQueue;
use crate::webhook::WebhookDispatcher;

use super::errors::HandlerError;
use super::{HandlerOutcome, JobHandler};

/// `create_instance`: runs the Lifecycle Controller's create flow, then
/// enqueues the `monitor_instance` job that watches it to `ready`.
pub struct CreateInstanceHandler {
    lifecycle: Arc<LifecycleController>,
    queue: Arc<JobQueue>,
}

impl CreateInstanceHandler {
    pub fn new(lifecycle: Arc<LifecycleController>, queue: Arc<JobQueue>) -> Self {
        Self { lifecycle, queue }
    }
}

#[async_trait]
impl JobHandler for CreateInstanceHandler {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome, HandlerError> {
        let JobPayload::CreateInstance(payload) = &job.payload else {
            return Err(HandlerError::Permanent("create_instance handler received the wrong payload type".to_string()));
        };
        let monitor_payload = self.lifecycle.create(payload).await?;
        self.queue
            .enqueue(JobPayload::MonitorInstance(monitor_payload), job.priority, job.max_attempts)
            .await?;
        Ok(HandlerOutcome::Complete)
    }
}

/// `monitor_instance` / `monitor_startup`: one poll cycle of the Lifecycle
/// Controller's state machine, registered for both job types since they
/// share a payload and differ only in the `is_startup_monitor` flag the
/// payload itself already carries.
pub struct MonitorInstanceHandler {
    lifecycle: Arc<LifecycleController>,
    poll_interval: Duration,
}

impl MonitorInstanceHandler {
    pub fn new(lifecycle: Arc<LifecycleController>, worker_config: &WorkerConfig) -> Self {
        Self {
            lifecycle,
            poll_interval: worker_config.poll_interval,
        }
    }
}

#[async_trait]
impl JobHandler for MonitorInstanceHandler {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome, HandlerError> {
        let payload = match &job.payload {
            JobPayload::MonitorInstance(p) | JobPayload::MonitorStartup(p) => p.clone(),
            _ => return Err(HandlerError::Permanent("monitor handler received the wrong payload type".to_string())),
        };
        let rewrap = |p| {
            if job.job_type() == JobType::MonitorStartup {
                JobPayload::MonitorStartup(p)
            } else {
                JobPayload::MonitorInstance(p)
            }
        };

        match self.lifecycle.monitor(payload).await? {
            MonitorOutcome::Continue(next) => Ok(HandlerOutcome::Reschedule {
                payload: rewrap(next),
                delay: self.poll_interval,
            }),
            MonitorOutcome::Ready => Ok(HandlerOutcome::Complete),
            MonitorOutcome::Failed { status, reason, .. } => {
                tracing::info!(job_id = %job.id, ?status, %reason, "monitor operation reached a terminal non-ready state");
                Ok(HandlerOutcome::Complete)
            }
        }
    }
}

/// `auto_stop_check`: one scan of the instance cache for idle `ready`/
/// `running` instances. Enqueued on a fixed interval by
/// the Auto-Stop Controller's ticker; the scan itself runs here so it is
/// bounded by the same per-job deadline and concurrency as everything
/// else the Worker Pool does.
pub struct AutoStopCheckHandler {
    instance_service: Arc<crate::instance_service::InstanceService>,
    config: crate::config::AutoStopConfig,
}

impl AutoStopCheckHandler {
    pub fn new(instance_service: Arc<crate::instance_service::InstanceService>, config: crate::config::AutoStopConfig) -> Self {
        Self { instance_service, config }
    }
}

#[async_trait]
impl JobHandler for AutoStopCheckHandler {
    async fn handle(&self, _job: &Job) -> Result<HandlerOutcome, HandlerError> {
        let summary = self
            .instance_service
            .run_auto_stop_scan(&self.config)
            .await
            .map_err(|e| HandlerError::Recoverable(e.to_string()))?;
        tracing::info!(
            scanned = summary.scanned,
            idle = summary.idle,
            stopped = summary.stopped,
            dry_run = self.config.dry_run,
            "auto-stop scan complete"
        );
        Ok(HandlerOutcome::Complete)
    }
}

/// `migrate_spot`: migrates one spot-reclaimed instance away from its
/// current host. The scan that decides *which*
/// instances are eligible runs in the Migration Controller's own
/// periodic task (a Provider list is a read, not a mutation); this
/// handler performs the one mutating call per eligible instance.
pub struct MigrateSpotHandler {
    provider: Arc<ProviderClient>,
    cache: Arc<crate::cache::CacheManager>,
    ledger: Arc<OperationLedger>,
}

impl MigrateSpotHandler {
    pub fn new(provider: Arc<ProviderClient>, cache: Arc<crate::cache::CacheManager>, ledger: Arc<OperationLedger>) -> Self {
        Self { provider, cache, ledger }
    }
}

#[async_trait]
impl JobHandler for MigrateSpotHandler {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome, HandlerError> {
        let JobPayload::MigrateSpot(payload) = &job.payload else {
            return Err(HandlerError::Permanent("migrate_spot handler received the wrong payload type".to_string()));
        };

        // The Migrate ledger entry is claimed atomically at enqueue time
        // (the Migration Controller's scan or retry loop), not here. If
        // it's no longer active, an earlier delivery of this same job
        // already completed or failed it, so skip the duplicate Provider
        // call instead of migrating the instance a second time.
        if self
            .ledger
            .active(&payload.instance_id, OperationKind::Migrate)
            .await?
            .is_none()
        {
            tracing::info!(
                instance_id = %payload.instance_id,
                provider_id = %payload.provider_id,
                "migrate_spot: operation no longer active, skipping duplicate provider call"
            );
            return Ok(HandlerOutcome::Complete);
        }

        match self.provider.migrate_instance(&payload.provider_id).await {
            Ok(()) => {
                self.ledger
                    .transition(&payload.instance_id, OperationKind::Migrate, OperationState::Completed)
                    .await?;
                if let Some(mut instance) = self.cache.instances.get(&payload.instance_id).await.map_err(HandlerError::from)? {
                    instance.last_error = None;
                    instance.error_code = None;
                    self.cache
                        .instances
                        .set(&payload.instance_id, &instance, None)
                        .await
                        .map_err(HandlerError::from)?;
                }
                Ok(HandlerOutcome::Complete)
            }
            Err(e) => {
                self.ledger
                    .fail(&payload.instance_id, OperationKind::Migrate, e.to_string())
                    .await?;
                Err(HandlerError::from(e))
            }
        }
    }
}

/// `send_webhook`: a standalone delivery job, for callers that need a
/// webhook fired outside the Lifecycle Controller's own inline
/// emission (e.g. the Instance Service's `deleted` notification).
pub struct SendWebhookHandler {
    dispatcher: Arc<WebhookDispatcher>,
}

impl SendWebhookHandler {
    pub fn new(dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl JobHandler for SendWebhookHandler {
    async fn handle(&self, job: &Job) -> Result<HandlerOutcome, HandlerError> {
        let JobPayload::SendWebhook(payload) = &job.payload else {
            return Err(HandlerError::Permanent("send_webhook handler received the wrong payload type".to_string()));
        };
        self.dispatcher.deliver(&payload.url, &payload.payload).await;
        Ok(HandlerOutcome::Complete)
    }
}
