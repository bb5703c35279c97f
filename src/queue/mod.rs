// =============================================================================
// queue/mod.rs — THE JOB QUEUE WORKER POOL
// =============================================================================
//
// A bounded pool of workers draining the store's job table (§4.H), replacing
// the 4 racing scanner tasks the teacher spawned against one event channel:
// here there's one pull loop per worker, coordinated entirely through the
// store rather than an in-process channel, because jobs must survive a
// process restart. Shutdown follows the teacher's `watch`-channel pattern:
// `stop()` flips the shared receiver, each worker finishes its current job
// and exits its loop, `run()` awaits all handles under a grace timeout.
// =============================================================================

pub mod handlers;

use crate::error::CoreResult;
use crate::metrics::MetricsCollector;
use crate::models::{Job, JobType};
use crate::store::Store;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>>;
}

pub struct JobQueueConfig {
    pub worker_pool_size: usize,
    pub idle_backoff: Duration,
    pub pull_error_backoff: Duration,
    pub shutdown_grace: Duration,
    pub reaper_interval: Duration,
    pub reaper_max_age: Duration,
}

pub struct JobQueue {
    store: Arc<Store>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    metrics: Arc<MetricsCollector>,
    config: JobQueueConfig,
    in_flight: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(
        store: Arc<Store>,
        handlers: HashMap<JobType, Arc<dyn JobHandler>>,
        metrics: Arc<MetricsCollector>,
        config: JobQueueConfig,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.worker_pool_size));
        Self { store, handlers, metrics, config, in_flight }
    }

    /// Spawns `worker_pool_size` workers plus a reaper; returns their join
    /// handles so the caller can await them against a shutdown timeout.
    pub fn run(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        for worker_id in 0..self.config.worker_pool_size {
            let store = self.store.clone();
            let handlers = self.handlers.clone();
            let metrics = self.metrics.clone();
            let idle_backoff = self.config.idle_backoff;
            let pull_error_backoff = self.config.pull_error_backoff;
            let permit = self.in_flight.clone();
            let mut shutdown = shutdown_rx.clone();

            handles.push(tokio::spawn(async move {
                info!(worker_id, "job worker online");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    let _permit = match permit.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    tokio::select! {
                        pulled = store.pull_next() => {
                            match pulled {
                                Ok(Some(job)) => {
                                    run_one(&store, &handlers, &metrics, job).await;
                                }
                                Ok(None) => {
                                    drop(_permit);
                                    tokio::time::sleep(idle_backoff).await;
                                }
                                Err(e) => {
                                    drop(_permit);
                                    warn!(worker_id, error = %e, "job pull failed");
                                    tokio::time::sleep(pull_error_backoff).await;
                                }
                            }
                        }
                        _ = shutdown.changed() => {
                            break;
                        }
                    }
                }
                info!(worker_id, "job worker offline");
            }));
        }

        let store = self.store.clone();
        let reaper_interval = self.config.reaper_interval;
        let reaper_max_age = self.config.reaper_max_age;
        let mut reaper_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(reaper_interval) => {
                        match store.reap_stuck_jobs(chrono::Duration::from_std(reaper_max_age).unwrap()).await {
                            Ok(n) if n > 0 => warn!(reaped = n, "reaped stuck RUNNING jobs back to PENDING"),
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "reaper pass failed"),
                        }
                    }
                    _ = reaper_shutdown.changed() => break,
                }
            }
        }));

        handles
    }

    pub async fn stats(&self) -> CoreResult<HashMap<String, i64>> {
        self.store.job_stats().await
    }
}

async fn run_one(
    store: &Arc<Store>,
    handlers: &HashMap<JobType, Arc<dyn JobHandler>>,
    metrics: &Arc<MetricsCollector>,
    job: Job,
) {
    let job_id = job.id;
    let job_type = job.job_type;

    let Some(handler) = handlers.get(&job_type).cloned() else {
        error!(%job_id, %job_type, "no handler registered for job type");
        let _ = store.fail_or_retry(job_id, "no handler registered").await;
        return;
    };

    // Run the handler on its own task so a panic surfaces as a JoinError
    // instead of taking the worker loop down with it.
    let job_for_handler = job.clone();
    let outcome = tokio::spawn(async move { handler.handle(&job_for_handler).await }).await;

    match outcome {
        Ok(Ok(result)) => {
            if let Err(e) = store.complete(job_id, result).await {
                error!(%job_id, error = %e, "failed to mark job COMPLETED");
            } else {
                metrics.incr_jobs_completed();
            }
        }
        Ok(Err(e)) if e.is_cancellation() => {
            warn!(%job_id, %job_type, error = %e, "job interrupted by shutdown, releasing for retry");
            if let Err(store_err) = store.release_for_cancellation(job_id, &e.to_string()).await {
                error!(%job_id, error = %store_err, "failed to release cancelled job");
            }
        }
        Ok(Err(e)) => {
            warn!(%job_id, %job_type, error = %e, "job failed");
            metrics.incr_jobs_retried();
            if let Err(store_err) = store.fail_or_retry(job_id, &e.to_string()).await {
                error!(%job_id, error = %store_err, "failed to record job failure");
            }
        }
        Err(join_err) => {
            error!(%job_id, %job_type, error = %join_err, "job handler panicked");
            metrics.incr_jobs_failed();
            let _ = store.fail_or_retry(job_id, "handler panicked").await;
        }
    }
}
