// =============================================================================
// handlers/deliver.rs — DELIVER (job handler for DELIVER)
// =============================================================================
//
// Hands one OutboxAlert to the external delivery dispatcher. The dispatcher
// contract is a single `dispatch(alert) -> {success, providerMessageId?,
// error?}` call; it need not be idempotent since the Job Queue's own retry
// policy and dedupKey already cover at-least-once delivery.
// =============================================================================

use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsCollector;
use crate::models::{Job, JobParameters, OutboxAlert};
use crate::queue::JobHandler;
use crate::store::Store;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &OutboxAlert) -> DispatchOutcome;
}

/// Publishes each alert as JSON on a Redis pub/sub channel and appends it to
/// a sorted set keyed by delivery time, so a downstream notifier can catch up
/// on alerts raised while it was offline (same durable-fan-out shape the
/// rest of this codebase uses for outbound events).
pub struct RedisAlertDispatcher {
    client: redis::Client,
    channel: String,
    sorted_set: String,
}

impl RedisAlertDispatcher {
    pub fn new(redis_url: &str, channel: impl Into<String>, sorted_set: impl Into<String>) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::Internal(format!("failed to build redis client: {e}")))?;
        Ok(Self { client, channel: channel.into(), sorted_set: sorted_set.into() })
    }
}

#[async_trait]
impl AlertDispatcher for RedisAlertDispatcher {
    async fn dispatch(&self, alert: &OutboxAlert) -> DispatchOutcome {
        let json = match serde_json::to_string(alert) {
            Ok(j) => j,
            Err(e) => return DispatchOutcome { success: false, provider_message_id: None, error: Some(e.to_string()) },
        };

        let mut con = match self.client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(e) => return DispatchOutcome { success: false, provider_message_id: None, error: Some(e.to_string()) },
        };

        if let Err(e) = con.publish::<_, _, ()>(&self.channel, &json).await {
            return DispatchOutcome { success: false, provider_message_id: None, error: Some(e.to_string()) };
        }

        let score = alert.scheduled_for.timestamp() as f64;
        if let Err(e) = con.zadd::<_, _, _, ()>(&self.sorted_set, &json, score).await {
            warn!(alert_id = %alert.id, error = %e, "alert published but not persisted to sorted set");
        }

        DispatchOutcome { success: true, provider_message_id: Some(alert.id.to_string()), error: None }
    }
}

pub struct DeliverHandler {
    store: Arc<Store>,
    dispatcher: Arc<dyn AlertDispatcher>,
    metrics: Arc<MetricsCollector>,
}

impl DeliverHandler {
    pub fn new(store: Arc<Store>, dispatcher: Arc<dyn AlertDispatcher>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, dispatcher, metrics }
    }
}

#[async_trait]
impl JobHandler for DeliverHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        let JobParameters::Deliver { outbox_alert_id } = &job.parameters else {
            return Err(CoreError::Internal("deliver handler received non-DELIVER parameters".into()));
        };

        let alert = self.store.get_outbox_alert(*outbox_alert_id).await?;
        let outcome = self.dispatcher.dispatch(&alert).await;

        if outcome.success {
            self.store.mark_outbox_sent(alert.id).await?;
            self.metrics.incr_alerts_delivered();
            info!(alert_id = %alert.id, "alert delivered");
            return Ok(Some(serde_json::to_value(&outcome)?));
        }

        error!(alert_id = %alert.id, error = ?outcome.error, "alert delivery attempt failed");
        if job.retry_count >= job.max_retries {
            self.store.mark_outbox_failed(alert.id).await?;
            self.metrics.incr_alerts_delivery_failed();
            return Ok(Some(serde_json::to_value(&outcome)?));
        }

        Err(CoreError::TransientTransport(
            outcome.error.unwrap_or_else(|| "dispatch failed".into()),
        ))
    }
}
