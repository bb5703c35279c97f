// =============================================================================
// handlers/poll.rs — POLL (job handler for POLL)
// =============================================================================
//
// Fetches filings newer than the company's `lastPolledAt` and enqueues one
// INGEST per new filing, deduped on `(cik, accessionNo)` so a re-poll before
// ingestion finishes never double-enqueues.
// =============================================================================

use crate::edgar::{EdgarFetcher, FilingQuery};
use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsCollector;
use crate::models::{Job, JobParameters, JobPriority};
use crate::queue::JobHandler;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

pub struct PollHandler {
    store: Arc<Store>,
    edgar: Arc<EdgarFetcher>,
    metrics: Arc<MetricsCollector>,
}

impl PollHandler {
    pub fn new(store: Arc<Store>, edgar: Arc<EdgarFetcher>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, edgar, metrics }
    }
}

#[async_trait]
impl JobHandler for PollHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        let JobParameters::Poll { cik } = &job.parameters else {
            return Err(CoreError::Internal("poll handler received non-POLL parameters".into()));
        };

        let company = self
            .store
            .get_company_by_cik(&crate::models::normalize_cik(cik))
            .await?;
        let since = company.as_ref().and_then(|c| c.last_polled_at);

        let query = FilingQuery { after: since, ..Default::default() };
        let filings = self.edgar.get_filings(cik, query).await?;

        let mut enqueued = 0u32;
        for f in &filings {
            let job = Job::new(
                JobParameters::Ingest {
                    cik: cik.clone(),
                    accession_no: f.accession_no.clone(),
                    form_type: f.form_type.clone(),
                    force_reprocess: false,
                    generate_alerts: true,
                },
                JobPriority::Normal,
            )
            .with_dedup_key(format!("ingest:{}:{}", crate::models::normalize_cik(cik), f.accession_no));
            self.store.enqueue(job).await?;
            enqueued += 1;
        }
        self.metrics.incr_jobs_enqueued();

        if let Some(company) = company {
            self.store.set_last_polled_at(company.id, chrono::Utc::now()).await?;
        }

        Ok(Some(serde_json::json!({ "ingestJobsEnqueued": enqueued })))
    }
}
