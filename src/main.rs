//! Process entrypoint: load configuration, wire every component, spawn
//! the Worker Pool and background controllers, and serve the Intent API
//! until a shutdown signal arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gpu_fleet_control::cache::CacheManager;
use gpu_fleet_control::config::Config;
use gpu_fleet_control::controllers::reconciler::StartupReconciler;
use gpu_fleet_control::controllers::{auto_stop, migration};
use gpu_fleet_control::health::HealthProber;
use gpu_fleet_control::http;
use gpu_fleet_control::instance_service::InstanceService;
use gpu_fleet_control::kv::fallback::FallbackKvStore;
use gpu_fleet_control::kv::redis::RedisStore;
use gpu_fleet_control::kv::KvStore;
use gpu_fleet_control::ledger::OperationLedger;
use gpu_fleet_control::lifecycle::LifecycleController;
use gpu_fleet_control::provider::ProviderClient;
use gpu_fleet_control::queue::model::JobType;
use gpu_fleet_control::queue::JobQueue;
use gpu_fleet_control::shutdown::ShutdownController;
use gpu_fleet_control::telemetry;
use gpu_fleet_control::webhook::WebhookDispatcher;
use gpu_fleet_control::worker::handlers::{
    AutoStopCheckHandler, CreateInstanceHandler, MigrateSpotHandler, MonitorInstanceHandler, SendWebhookHandler,
};
use gpu_fleet_control::worker::{JobHandler, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let remote = RedisStore::connect(&config.kv.url, &config.kv.key_prefix).await?;
    let kv: Arc<dyn KvStore> = Arc::new(FallbackKvStore::new(remote, config.kv.fallback_enabled));

    let cache = Arc::new(CacheManager::initialize(Arc::clone(&kv)));
    let queue = Arc::new(JobQueue::new(Arc::clone(&kv)));
    let ledger = Arc::new(OperationLedger::new(Arc::clone(&kv)));
    let provider = Arc::new(ProviderClient::new(config.provider.clone()));
    let webhooks = Arc::new(WebhookDispatcher::new(config.webhook.clone()));
    let prober = Arc::new(HealthProber::new());

    let lifecycle = Arc::new(LifecycleController::new(
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&prober),
        Arc::clone(&webhooks),
        Arc::clone(&ledger),
        config.worker.clone(),
    ));

    let reconciler = Arc::new(StartupReconciler::new(
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&kv),
        config.reconciler.clone(),
    ));

    let instance_service = Arc::new(InstanceService::new(
        Arc::clone(&cache),
        Arc::clone(&provider),
        Arc::clone(&queue),
        Arc::clone(&ledger),
        Arc::clone(&kv),
        Arc::clone(&reconciler),
        &config.http,
        &config.worker,
        config.auto_stop.clone(),
    ));

    reconciler.run_at_boot().await;

    let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
    handlers.insert(
        JobType::CreateInstance,
        Arc::new(CreateInstanceHandler::new(Arc::clone(&lifecycle), Arc::clone(&queue))),
    );
    let monitor_handler: Arc<dyn JobHandler> = Arc::new(MonitorInstanceHandler::new(Arc::clone(&lifecycle), &config.worker));
    handlers.insert(JobType::MonitorInstance, Arc::clone(&monitor_handler));
    handlers.insert(JobType::MonitorStartup, monitor_handler);
    handlers.insert(
        JobType::AutoStopCheck,
        Arc::new(AutoStopCheckHandler::new(Arc::clone(&instance_service), config.auto_stop.clone())),
    );
    handlers.insert(
        JobType::MigrateSpot,
        Arc::new(MigrateSpotHandler::new(Arc::clone(&provider), Arc::clone(&cache), Arc::clone(&ledger))),
    );
    handlers.insert(JobType::SendWebhook, Arc::new(SendWebhookHandler::new(Arc::clone(&webhooks))));

    let shutdown = ShutdownController::new();

    let worker_pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        handlers,
        config.worker.concurrency,
        config.worker.job_timeout,
    ));
    let worker_handles = worker_pool.spawn(shutdown.subscribe());

    let stuck_job_sweep = tokio::spawn(recover_stuck_jobs(Arc::clone(&queue), config.worker.job_timeout, shutdown.subscribe()));

    let auto_stop_task = tokio::spawn(auto_stop::run(Arc::clone(&queue), config.auto_stop.interval, shutdown.subscribe()));
    let migration_task = tokio::spawn(migration::run(
        Arc::clone(&provider),
        Arc::clone(&cache),
        Arc::clone(&queue),
        Arc::clone(&ledger),
        config.migration.clone(),
        shutdown.subscribe(),
    ));

    let app = http::router(Arc::clone(&instance_service));
    let addr = format!("0.0.0.0:{}", config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let mut server_shutdown = shutdown.subscribe();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited with error");
            }
        }
        _ = ShutdownController::wait_for_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    shutdown.trigger();

    tokio::time::timeout(
        config.worker.shutdown_grace,
        futures::future::join_all(worker_handles),
    )
    .await
    .ok();

    auto_stop_task.abort();
    migration_task.abort();
    stuck_job_sweep.abort();

    tracing::info!("shutdown complete");
    Ok(())
}

/// Periodically requeues jobs a crashed worker left stuck in `processing`
/// past their deadline. The in-process per-job timeout in [`WorkerPool`]
/// handles the ordinary case; this sweep only matters after a worker dies
/// without ever reaching that timeout (process crash, OOM kill).
async fn recover_stuck_jobs(queue: Arc<JobQueue>, job_timeout: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let stuck_after = job_timeout * 2;
    let mut ticker = tokio::time::interval(job_timeout);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match queue.recover_stuck(stuck_after).await {
                    Ok(0) => {}
                    Ok(n) => tracing::warn!(recovered = n, "requeued stuck jobs"),
                    Err(e) => tracing::warn!(error = %e, "stuck-job recovery failed"),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
