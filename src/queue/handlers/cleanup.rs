// =============================================================================
// handlers/cleanup.rs — CLEANUP (job handler for CLEANUP)
// =============================================================================
//
// Periodic maintenance: purges terminal jobs and delivered/failed outbox
// alerts past their retention window, bounding table growth the same way the
// reaper bounds stuck RUNNING jobs.
// =============================================================================

use crate::error::{CoreError, CoreResult};
use crate::models::{Job, JobParameters};
use crate::queue::JobHandler;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

pub struct CleanupHandler {
    store: Arc<Store>,
    retention: chrono::Duration,
}

impl CleanupHandler {
    pub fn new(store: Arc<Store>, retention: chrono::Duration) -> Self {
        Self { store, retention }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        if !matches!(job.parameters, JobParameters::Cleanup) {
            return Err(CoreError::Internal("cleanup handler received non-CLEANUP parameters".into()));
        }

        let jobs_purged = self.store.purge_terminal_jobs_older_than(self.retention).await?;
        let alerts_purged = self.store.purge_terminal_outbox_older_than(self.retention).await?;

        Ok(Some(serde_json::json!({
            "jobsPurged": jobs_purged,
            "outboxAlertsPurged": alerts_purged,
        })))
    }
}
