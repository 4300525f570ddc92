//! Auto-Stop Controller: a ticker with no state of its
//! own. Each tick enqueues one empty-payload `auto_stop_check` job; the
//! actual idle scan and stop calls run inside that job's handler
//! (`worker::handlers::AutoStopCheckHandler`), not here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::queue::model::{AutoStopCheckPayload, JobPayload};
use crate::queue::JobQueue;

const JOB_MAX_ATTEMPTS: u32 = 1;

pub async fn run(queue: Arc<JobQueue>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = queue
                    .enqueue(JobPayload::AutoStopCheck(AutoStopCheckPayload {}), 0, JOB_MAX_ATTEMPTS)
                    .await
                {
                    tracing::warn!(error = %e, "failed to enqueue auto_stop_check");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("auto-stop controller shutting down");
                return;
            }
        }
    }
}
