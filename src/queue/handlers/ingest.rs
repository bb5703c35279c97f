// =============================================================================
// handlers/ingest.rs — INGESTION WORKFLOW (job handler for INGEST)
// =============================================================================
//
// Steps 2-6 are idempotent and retry-safe: a re-run fetches the same content,
// upserts the same company/filing rows, and `compare_filings` is
// deterministic, so only step 7's single transaction is ever observable.
// =============================================================================

use crate::analysis::diff_engine::compare_filings;
use crate::edgar::EdgarFetcher;
use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsCollector;
use crate::models::{Filing, Job, JobParameters, JobPriority};
use crate::queue::JobHandler;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct IngestHandler {
    store: Arc<Store>,
    edgar: Arc<EdgarFetcher>,
    metrics: Arc<MetricsCollector>,
}

impl IngestHandler {
    pub fn new(store: Arc<Store>, edgar: Arc<EdgarFetcher>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, edgar, metrics }
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        let JobParameters::Ingest { cik, accession_no, form_type, force_reprocess, generate_alerts } =
            &job.parameters
        else {
            return Err(CoreError::Internal("ingest handler received non-INGEST parameters".into()));
        };

        if !force_reprocess {
            if self.store.find_processed_filing(cik, accession_no).await?.is_some() {
                return Ok(Some(serde_json::json!({ "already": true })));
            }
        }

        let (company_info, filings) = self.edgar.get_submissions(cik).await?;
        let content = self.edgar.get_filing_content(cik, accession_no).await?;

        let meta = filings.iter().find(|f| &f.accession_no == accession_no);

        let company = self
            .store
            .upsert_company(cik, &company_info.name, company_info.tickers.first().map(String::as_str))
            .await?;

        let archive_cik = crate::models::cik_for_archive_path(&crate::models::normalize_cik(cik));
        let archive_accession = crate::models::accession_for_archive_path(accession_no);
        let url = format!(
            "https://www.sec.gov/Archives/edgar/data/{archive_cik}/{archive_accession}/{accession_no}-index.html"
        );

        let filed_date = meta.map(|m| m.filed_date).unwrap_or_else(|| {
            warn!(cik, accession_no, "accession not found in submissions feed, falling back to ingestion time");
            chrono::Utc::now()
        });
        let report_date = meta.and_then(|m| m.report_date);

        let draft = Filing::new(
            company.id,
            cik,
            accession_no,
            form_type.clone(),
            filed_date,
            url,
            &content.primary_text,
        )
        .with_report_date(report_date);
        let filing = self.store.upsert_filing_draft(&draft).await?;

        let comparable_forms = Filing::comparable_form_types(form_type);
        let previous = self
            .store
            .find_latest_comparable_filing(company.id, comparable_forms, filing.id)
            .await?;

        let previous_text = previous.as_ref().map(|p| p.raw_content.as_str());
        let previous_id = previous.as_ref().map(|p| p.id).unwrap_or_else(Uuid::nil);

        let comparison = compare_filings(filing.id, previous_id, previous_text, &content.primary_text, form_type);

        let diffs: Vec<_> = comparison.section_diffs.iter().map(|sd| sd.diff.clone()).collect();
        let sections = crate::analysis::section_extractor::extract_sections(filing.id, &content.primary_text, form_type);

        self.store.persist_ingestion_result(filing.id, &sections, &diffs).await?;
        self.metrics.incr_filings_ingested();
        self.metrics.add_material_changes(comparison.material_changes as u64);

        if *generate_alerts && comparison.material_changes > 0 {
            let job = Job::new(JobParameters::AlertFanout { filing_id: filing.id }, JobPriority::High)
                .with_dedup_key(format!("alert_fanout:{}", filing.id));
            self.store.enqueue(job).await?;
        }

        Ok(Some(serde_json::json!({
            "filingId": filing.id,
            "materialChanges": comparison.material_changes,
            "overallMaterialityScore": comparison.overall_materiality_score,
        })))
    }
}
