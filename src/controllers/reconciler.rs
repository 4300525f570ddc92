//! Startup Reconciler: one-shot reconciliation between
//! the local cache and the Provider's own instance list, run at boot (and
//! on demand via `InstanceService::sync_now`). Guarded by a distributed
//! lock so two replicas booting together don't race each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::config::{OrphanPolicy, ReconcilerConfig};
use crate::error::AppError;
use crate::kv::KvStore;
use crate::model::{Instance, InstanceConfig, InstanceStatus};
use crate::provider::{ProviderClient, ProviderInstance};

const LOCK_NAME: &str = "startup_reconciler";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    /// `false` when another process already held the reconciliation lock;
    /// every other field is zero in that case since no work ran.
    pub ran: bool,
    pub provider_seen: usize,
    pub upserted: usize,
    pub orphaned: usize,
    pub reaped: usize,
}

pub struct StartupReconciler {
    provider: Arc<ProviderClient>,
    cache: Arc<CacheManager>,
    kv: Arc<dyn KvStore>,
    config: ReconcilerConfig,
}

impl StartupReconciler {
    pub fn new(provider: Arc<ProviderClient>, cache: Arc<CacheManager>, kv: Arc<dyn KvStore>, config: ReconcilerConfig) -> Self {
        Self { provider, cache, kv, config }
    }

    /// Runs once at boot; failures are logged, not propagated, so a
    /// Provider outage at startup doesn't prevent the process from serving
    /// requests against whatever the cache already holds.
    pub async fn run_at_boot(&self) {
        match self.run().await {
            Ok(summary) => tracing::info!(
                ran = summary.ran,
                provider_seen = summary.provider_seen,
                upserted = summary.upserted,
                orphaned = summary.orphaned,
                reaped = summary.reaped,
                "startup reconciliation complete"
            ),
            Err(e) => tracing::warn!(error = %e, "startup reconciliation failed"),
        }
    }

    /// `SyncNow` and the boot-time pass share this.
    pub async fn run(&self) -> Result<ReconcileSummary, AppError> {
        let holder = Uuid::new_v4().to_string();
        if !self.kv.acquire_lock(LOCK_NAME, &holder, self.config.lock_ttl).await? {
            return Ok(ReconcileSummary { ran: false, ..Default::default() });
        }
        let result = self.reconcile().await;
        self.kv.release_lock(LOCK_NAME, &holder).await?;
        result
    }

    async fn reconcile(&self) -> Result<ReconcileSummary, AppError> {
        let snapshot = self.provider_snapshot().await?;
        let by_provider_id: HashMap<&str, &ProviderInstance> =
            snapshot.iter().map(|p| (p.provider_id.as_str(), p)).collect();

        let mut local = Vec::new();
        for key in self.cache.instances.keys().await? {
            if let Some(instance) = self.cache.instances.get(&key).await? {
                local.push(instance);
            }
        }
        let known_provider_ids: std::collections::HashSet<&str> =
            local.iter().filter_map(|i| i.provider_id.as_deref()).collect();

        let mut upserted = 0usize;
        for p in &snapshot {
            if known_provider_ids.contains(p.provider_id.as_str()) {
                continue;
            }
            let synthesized = synthesize(p);
            self.cache.instances.set(&synthesized.id, &synthesized, None).await?;
            upserted += 1;
        }

        let now = Utc::now();
        let mut orphaned = 0usize;
        let mut reaped = 0usize;
        for mut instance in local {
            let Some(provider_id) = instance.provider_id.clone() else {
                continue;
            };
            if by_provider_id.contains_key(provider_id.as_str()) {
                if let Some(p) = by_provider_id.get(provider_id.as_str()) {
                    instance.status = InstanceStatus::from_provider_str(&p.status);
                    instance.ip_address = p.ip_address.clone().or(instance.ip_address.clone());
                    instance.last_synced = Some(now);
                    self.cache.instances.set(&instance.id, &instance, None).await?;
                }
                continue;
            }

            if instance.status.is_terminated() {
                let marked_at = instance.failed_at.unwrap_or(instance.created_at);
                if now - marked_at > chrono::Duration::from_std(self.config.orphan_retention).unwrap_or_default() {
                    self.cache.instances.delete(&instance.id).await?;
                    reaped += 1;
                }
                continue;
            }

            match self.config.orphan_policy {
                OrphanPolicy::Delete => {
                    self.cache.instances.delete(&instance.id).await?;
                }
                OrphanPolicy::Mark => {
                    instance.status = InstanceStatus::Terminated;
                    instance.failed_at = Some(now);
                    instance.last_error = Some("orphaned: missing from provider snapshot".to_string());
                    self.cache.instances.set(&instance.id, &instance, None).await?;
                }
            }
            orphaned += 1;
        }

        Ok(ReconcileSummary {
            ran: true,
            provider_seen: snapshot.len(),
            upserted,
            orphaned,
            reaped,
        })
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
}

/// A minimal record for an instance the Provider reports but the local
/// cache has never seen (the `includeProviderOnly` listing mode). `id`
/// is set to the Provider id since no internal id is known.
fn synthesize(p: &ProviderInstance) -> Instance {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::kv::memory::MemoryStore;
    use secrecy::SecretString;
    use std::time::Duration;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            internal_base_url: "http://127.0.0.1:1".to_string(),
            api_key: SecretString::from("k".to_string()),
            internal_api_key: SecretString::from("k".to_string()),
            request_timeout: Duration::from_millis(100),
            max_retry_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_cap_delay: Duration::from_millis(2),
            rate_limit_capacity: 1000,
            rate_limit_window: Duration::from_millis(1),
            circuit_failure_threshold: 100,
            circuit_open_duration: Duration::from_secs(1),
            circuit_half_open_successes: 1,
        }
    }

    fn reconciler_config() -> ReconcilerConfig {
        ReconcilerConfig {
            orphan_policy: OrphanPolicy::Mark,
            orphan_retention: Duration::from_secs(7 * 24 * 3_600),
            lock_ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn second_concurrent_run_is_skipped_while_locked() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheManager::initialize(Arc::clone(&kv)));
        let provider = Arc::new(ProviderClient::new(provider_config()));
        let reconciler = Arc::new(StartupReconciler::new(provider, cache, Arc::clone(&kv), reconciler_config()));

        let holder = "someone-else";
        assert!(kv.acquire_lock(LOCK_NAME, holder, Duration::from_secs(60)).await.unwrap());

        let summary = reconciler.run().await.unwrap();
        assert!(!summary.ran);
    }
}
