// =============================================================================
// handlers/price_refresh.rs — PRICE_REFRESH (job handler for PRICE_REFRESH)
// =============================================================================
//
// Forces a fresh quote fetch for one symbol, warming §4.D's cache ahead of
// read-path requests. Failures are non-fatal to the rest of the pipeline:
// the next read simply falls back to a cache miss.
// =============================================================================

use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsCollector;
use crate::models::{Job, JobParameters};
use crate::price::{GetQuoteOptions, PriceAdapter};
use crate::queue::JobHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct PriceRefreshHandler {
    adapter: Arc<PriceAdapter>,
    metrics: Arc<MetricsCollector>,
}

impl PriceRefreshHandler {
    pub fn new(adapter: Arc<PriceAdapter>, metrics: Arc<MetricsCollector>) -> Self {
        Self { adapter, metrics }
    }
}

#[async_trait]
impl JobHandler for PriceRefreshHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        let JobParameters::PriceRefresh { symbol } = &job.parameters else {
            return Err(CoreError::Internal("price_refresh handler received non-PRICE_REFRESH parameters".into()));
        };

        let opts = GetQuoteOptions { skip_cache: true, ..Default::default() };
        match self.adapter.get_quote(symbol, opts).await {
            Ok(quote) => {
                self.metrics.incr_quote_provider_success();
                Ok(Some(serde_json::json!({ "symbol": symbol, "provider": quote.provider })))
            }
            Err(e) => {
                warn!(%symbol, error = %e, "price refresh failed");
                self.metrics.incr_quote_provider_failure();
                Err(e)
            }
        }
    }
}
