// =============================================================================
// poller.rs — THE POLLER / SCHEDULER (§4.K)
// =============================================================================
//
// A single ticker task, not a worker: every `poll_interval` it walks the
// active Company catalogue and enqueues one POLL job per company. The
// `dedupKey` buckets by `now / poll_interval`, so if a tick runs long and
// overlaps the next one, both land on the same bucket and collapse into one
// pending job instead of piling up.
// =============================================================================

use crate::models::{Job, JobParameters, JobPriority};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub async fn run(store: Arc<Store>, poll_interval: Duration, shutdown: &mut watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = tick(&store, poll_interval).await {
                    error!(error = %e, "poller tick failed");
                }
            }
            _ = shutdown.changed() => {
                info!("poller shutting down");
                break;
            }
        }
    }
}

async fn tick(store: &Arc<Store>, poll_interval: Duration) -> crate::error::CoreResult<()> {
    let companies = store.list_active_companies().await?;
    let bucket = chrono::Utc::now().timestamp() / poll_interval.as_secs().max(1) as i64;

    let mut enqueued = 0u32;
    for company in companies {
        let job = Job::new(JobParameters::Poll { cik: company.cik.clone() }, JobPriority::Low)
            .with_dedup_key(format!("poll:{}:{}", company.cik, bucket));
        match store.enqueue(job).await {
            Ok(_) => enqueued += 1,
            Err(e) => warn!(cik = %company.cik, error = %e, "failed to enqueue poll job"),
        }
    }
    info!(enqueued, bucket, "poller tick complete");
    Ok(())
}
