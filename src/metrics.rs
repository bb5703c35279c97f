// =============================================================================
// metrics.rs — THE METRICS COLLECTOR
// =============================================================================
//
// Lock-free atomic counters, snapshotted into JSON, served off a tiny hand
// rolled HTTP listener on `metrics_port`. Same shape the rest of this
// codebase has always used for observability: no metrics crate, just atomics
// and a raw TCP accept loop (see the teacher's metrics module).
// =============================================================================

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub filings_ingested: u64,
    pub material_changes_detected: u64,
    pub alerts_enqueued: u64,
    pub alerts_delivered: u64,
    pub alerts_delivery_failed: u64,
    pub quote_provider_successes: u64,
    pub quote_provider_failures: u64,
    pub quote_all_providers_unavailable: u64,
    pub edgar_circuit_trips: u64,
    pub uptime_seconds: u64,
    pub jobs_per_minute: f64,
    pub status: String,
}

pub struct MetricsCollector {
    jobs_enqueued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    filings_ingested: AtomicU64,
    material_changes_detected: AtomicU64,
    alerts_enqueued: AtomicU64,
    alerts_delivered: AtomicU64,
    alerts_delivery_failed: AtomicU64,
    quote_provider_successes: AtomicU64,
    quote_provider_failures: AtomicU64,
    quote_all_providers_unavailable: AtomicU64,
    edgar_circuit_trips: AtomicU64,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_enqueued: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            filings_ingested: AtomicU64::new(0),
            material_changes_detected: AtomicU64::new(0),
            alerts_enqueued: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            alerts_delivery_failed: AtomicU64::new(0),
            quote_provider_successes: AtomicU64::new(0),
            quote_provider_failures: AtomicU64::new(0),
            quote_all_providers_unavailable: AtomicU64::new(0),
            edgar_circuit_trips: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn incr_jobs_enqueued(&self) { self.jobs_enqueued.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_jobs_completed(&self) { self.jobs_completed.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_jobs_failed(&self) { self.jobs_failed.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_jobs_retried(&self) { self.jobs_retried.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_filings_ingested(&self) { self.filings_ingested.fetch_add(1, Ordering::Relaxed); }
    pub fn add_material_changes(&self, n: u64) { self.material_changes_detected.fetch_add(n, Ordering::Relaxed); }
    pub fn incr_alerts_enqueued(&self) { self.alerts_enqueued.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_alerts_delivered(&self) { self.alerts_delivered.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_alerts_delivery_failed(&self) { self.alerts_delivery_failed.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_quote_provider_success(&self) { self.quote_provider_successes.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_quote_provider_failure(&self) { self.quote_provider_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_quote_all_providers_unavailable(&self) { self.quote_all_providers_unavailable.fetch_add(1, Ordering::Relaxed); }
    pub fn incr_edgar_circuit_trips(&self) { self.edgar_circuit_trips.fetch_add(1, Ordering::Relaxed); }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let completed = self.jobs_completed.load(Ordering::Relaxed);
        let jobs_per_minute = if uptime > 0 {
            (completed as f64 / uptime as f64) * 60.0
        } else {
            0.0
        };

        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_completed: completed,
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            filings_ingested: self.filings_ingested.load(Ordering::Relaxed),
            material_changes_detected: self.material_changes_detected.load(Ordering::Relaxed),
            alerts_enqueued: self.alerts_enqueued.load(Ordering::Relaxed),
            alerts_delivered: self.alerts_delivered.load(Ordering::Relaxed),
            alerts_delivery_failed: self.alerts_delivery_failed.load(Ordering::Relaxed),
            quote_provider_successes: self.quote_provider_successes.load(Ordering::Relaxed),
            quote_provider_failures: self.quote_provider_failures.load(Ordering::Relaxed),
            quote_all_providers_unavailable: self.quote_all_providers_unavailable.load(Ordering::Relaxed),
            edgar_circuit_trips: self.edgar_circuit_trips.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            jobs_per_minute,
            status: "operational".to_string(),
        }
    }
}

/// A tiny hand-rolled HTTP server exposing `/metrics` as JSON. No web
/// framework: one TCP accept loop, one response, same as the rest of this
/// codebase's observability surface.
pub async fn run_metrics_server(
    metrics: Arc<MetricsCollector>,
    port: u16,
    shutdown: &mut watch::Receiver<bool>,
) {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };

    info!(%addr, "metrics server listening");

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((mut stream, _addr)) => {
                        let snapshot = metrics.snapshot();
                        let json = serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string());
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n{}",
                            json.len(),
                            json,
                        );
                        let _ = stream.write_all(response.as_bytes()).await;
                    }
                    Err(e) => error!(error = %e, "metrics server accept error"),
                }
            }
            _ = shutdown.changed() => {
                info!("metrics server shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_incremented_counters() {
        let m = MetricsCollector::new();
        m.incr_jobs_enqueued();
        m.incr_jobs_enqueued();
        m.incr_jobs_completed();
        let snap = m.snapshot();
        assert_eq!(snap.jobs_enqueued, 2);
        assert_eq!(snap.jobs_completed, 1);
    }
}
