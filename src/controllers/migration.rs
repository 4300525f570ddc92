//! Migration Controller: proactively migrates spot-
//! reclaimed instances off their current host. The scan is a Provider
//! *read* and runs here; the one mutating call per eligible instance
//! happens in `worker::handlers::MigrateSpotHandler`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cache::CacheManager;
use crate::config::MigrationConfig;
use crate::ledger::{OperationKind, OperationLedger};
use crate::provider::ProviderClient;
use crate::queue::model::{JobPayload, MigrateSpotPayload};
use crate::queue::JobQueue;

const JOB_MAX_ATTEMPTS: u32 = 3;

pub async fn run(
    provider: Arc<ProviderClient>,
    cache: Arc<CacheManager>,
    queue: Arc<JobQueue>,
    ledger: Arc<OperationLedger>,
    config: MigrationConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if !config.enabled {
        tracing::info!("migration controller disabled");
        return;
    }

    let mut scan_ticker = tokio::time::interval(config.interval);
    scan_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut retry_ticker = tokio::time::interval(config.retry_interval);
    retry_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = scan_ticker.tick() => {
                scan_and_enqueue(&provider, &cache, &queue, &ledger, &config).await;
            }
            _ = retry_ticker.tick() => {
                retry_failed(&cache, &queue, &ledger, &config).await;
            }
            _ = shutdown.changed() => {
                tracing::info!("migration controller shutting down");
                return;
            }
        }
    }
}

/// Per-execution result of one scan, shaped after the spec's
/// `{total, exited, eligible, migrated, skipped, errors, attempts[]}`:
/// logged as one structured event rather than surfaced over the Intent
/// API, since the spec names no `GetMigrationStats` operation for it.
#[derive(Debug, Default)]
struct ScanResult {
    total: usize,
    exited: usize,
    eligible: usize,
    migrated: usize,
    skipped: usize,
    errors: Vec<ScanError>,
    attempts: Vec<String>,
}

#[derive(Debug)]
struct ScanError {
    category: &'static str,
    provider_id: String,
    detail: String,
}

async fn scan_and_enqueue(
    provider: &Arc<ProviderClient>,
    cache: &Arc<CacheManager>,
    queue: &Arc<JobQueue>,
    ledger: &Arc<OperationLedger>,
    config: &MigrationConfig,
) {
    let mut cursor = None;
    let mut candidates = Vec::new();
    let mut result = ScanResult::default();

    loop {
        let page = match provider.list_instances(cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                result.errors.push(ScanError {
                    category: "api",
                    provider_id: String::new(),
                    detail: e.to_string(),
                });
                tracing::warn!(error = %e, "migration scan: failed to list provider instances");
                break;
            }
        };
        result.total += page.instances.len();
        for p in &page.instances {
            if p.status == "exited" {
                result.exited += 1;
            }
            if p.spot_reclaimed {
                candidates.push(p.provider_id.clone());
            }
        }
        cursor = page.next_cursor;
        if cursor.is_none() || candidates.len() >= config.batch_size {
            break;
        }
    }
    candidates.truncate(config.batch_size);
    result.eligible = candidates.len();

    for provider_id in candidates {
        let Some(instance_id) = find_instance_id(cache, &provider_id).await else {
            result.errors.push(ScanError {
                category: "eligibility",
                provider_id: provider_id.clone(),
                detail: "no cached instance maps to this provider id".to_string(),
            });
            continue;
        };
        result.attempts.push(instance_id.clone());
        if config.dry_run {
            result.skipped += 1;
            tracing::info!(instance_id, provider_id, "migration dry-run: would enqueue migrate_spot");
            continue;
        }
        // Claims the Migrate ledger entry atomically, right here at enqueue
        // time, so a second scan tick within the same interval sees the
        // operation already active and skips it instead of enqueueing a
        // second `migrate_spot` job for the same instance.
        match ledger.try_begin(&instance_id, OperationKind::Migrate).await {
            Ok(None) => result.skipped += 1,
            Ok(Some(_)) => {
                let payload = JobPayload::MigrateSpot(MigrateSpotPayload {
                    instance_id: instance_id.clone(),
                    provider_id: provider_id.clone(),
                });
                match queue.enqueue(payload, 0, JOB_MAX_ATTEMPTS).await {
                    Ok(_) => result.migrated += 1,
                    Err(e) => {
                        // The job never made it onto the queue; fail the
                        // ledger entry so it doesn't sit "active" forever
                        // and block every future scan from retrying.
                        if let Err(fail_err) = ledger.fail(&instance_id, OperationKind::Migrate, e.to_string()).await {
                            tracing::warn!(instance_id, error = %fail_err, "failed to release migrate ledger entry after a failed enqueue");
                        }
                        result.errors.push(ScanError {
                            category: "migration",
                            provider_id,
                            detail: e.to_string(),
                        })
                    }
                }
            }
            Err(e) => result.errors.push(ScanError {
                category: "config",
                provider_id,
                detail: e.to_string(),
            }),
        }
    }

    tracing::info!(
        total = result.total,
        exited = result.exited,
        eligible = result.eligible,
        migrated = result.migrated,
        skipped = result.skipped,
        errors = result.errors.len(),
        attempts = ?result.attempts,
        dry_run = config.dry_run,
        "migration scan complete"
    );
    for err in &result.errors {
        tracing::warn!(category = err.category, provider_id = %err.provider_id, detail = %err.detail, "migration scan error");
    }
}

/// Re-attempts migrations the Worker Pool previously marked `failed` in
/// the Operation Ledger, at a slower cadence than the main scan so a
/// flaky Provider call doesn't get hammered. The ledger only records that
/// a migration failed, not the original payload, so the provider id is
/// re-looked-up from the cached instance.
async fn retry_failed(cache: &Arc<CacheManager>, queue: &Arc<JobQueue>, ledger: &Arc<OperationLedger>, config: &MigrationConfig) {
    if config.dry_run {
        return;
    }
    let failed = match ledger.failed_operations(OperationKind::Migrate).await {
        Ok(ops) => ops,
        Err(e) => {
            tracing::warn!(error = %e, "migration retry: failed to read ledger");
            return;
        }
    };

    let mut retried = 0usize;
    for op in failed {
        let Ok(Some(instance)) = cache.instances.get(&op.instance_id).await else {
            continue;
        };
        let Some(provider_id) = instance.provider_id else {
            continue;
        };
        match ledger.try_begin(&op.instance_id, OperationKind::Migrate).await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(instance_id = %op.instance_id, error = %e, "failed to begin migrate retry operation");
                continue;
            }
        }
        let payload = JobPayload::MigrateSpot(MigrateSpotPayload {
            instance_id: op.instance_id.clone(),
            provider_id,
        });
        if let Err(e) = queue.enqueue(payload, 0, JOB_MAX_ATTEMPTS).await {
            tracing::warn!(instance_id = %op.instance_id, error = %e, "failed to re-enqueue migrate_spot");
            continue;
        }
        retried += 1;
    }
    if retried > 0 {
        tracing::info!(retried, "re-enqueued previously-failed migrations");
    }
}

async fn find_instance_id(cache: &Arc<CacheManager>, provider_id: &str) -> Option<String> {
    for key in cache.instances.keys().await.ok()? {
        if let Ok(Some(instance)) = cache.instances.get(&key).await {
            if instance.provider_id.as_deref() == Some(provider_id) {
                return Some(instance.id);
            }
        }
    }
    None
}
