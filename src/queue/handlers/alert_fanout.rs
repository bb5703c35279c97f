// =============================================================================
// handlers/alert_fanout.rs — ALERT FAN-OUT (job handler for ALERT_FANOUT)
// =============================================================================

use crate::error::{CoreError, CoreResult};
use crate::metrics::MetricsCollector;
use crate::models::{
    AlertFrequency, AlertType, Job, JobParameters, JobPriority, OutboxAlert, OutboxStatus,
};
use crate::queue::JobHandler;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub struct AlertFanoutHandler {
    store: Arc<Store>,
    metrics: Arc<MetricsCollector>,
}

impl AlertFanoutHandler {
    pub fn new(store: Arc<Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl JobHandler for AlertFanoutHandler {
    async fn handle(&self, job: &Job) -> CoreResult<Option<serde_json::Value>> {
        let JobParameters::AlertFanout { filing_id } = &job.parameters else {
            return Err(CoreError::Internal("alert_fanout handler received non-ALERT_FANOUT parameters".into()));
        };

        let filing = self.store.get_filing(*filing_id).await?;
        let mut material_diffs = self.store.material_diffs_for_filing(*filing_id).await?;
        material_diffs.sort_by(|a, b| b.materiality_score.partial_cmp(&a.materiality_score).unwrap());
        if material_diffs.is_empty() {
            return Ok(Some(serde_json::json!({ "alertsCreated": 0 })));
        }
        let company = self.store.get_company(filing.company_id).await?;

        let watchlists = self.store.list_active_watchlists_for_company(company.id).await?;
        let mut created = 0u32;
        let now = Utc::now();

        for wl in watchlists {
            let rules = self.store.list_alert_rules_for_user(wl.user_id).await?;
            for rule in rules {
                if rule.alert_type != AlertType::MaterialChange || !rule.is_enabled {
                    continue;
                }
                if !wl.alert_types.contains(&AlertType::MaterialChange) {
                    continue;
                }

                let scheduled_for = rule
                    .quiet_hours
                    .as_ref()
                    .and_then(|qh| next_window_exit(qh, now))
                    .unwrap_or(now);

                let summary_line = format!(
                    "{} ({}) filed {} — {} material change(s), top: {}",
                    company.name,
                    company.symbol.as_deref().unwrap_or(&company.cik),
                    filing.form_type,
                    material_diffs.len(),
                    material_diffs[0].summary,
                );

                if rule.frequency != AlertFrequency::Immediate {
                    let bucket_key = coalesce_bucket_key(rule.frequency, rule.user_id, rule.method, now);
                    if let Some(existing) = self
                        .store
                        .find_coalescable_outbox(rule.user_id, rule.method, &bucket_key)
                        .await?
                    {
                        self.store.append_to_coalesced_body(existing.id, &summary_line).await?;
                        continue;
                    }

                    let alert = OutboxAlert {
                        id: Uuid::new_v4(),
                        user_id: rule.user_id,
                        method: rule.method,
                        recipient: rule.user_id.to_string(),
                        title: format!("Material filing change: {}", company.name),
                        body: summary_line,
                        priority: JobPriority::Normal,
                        dedup_key: bucket_key,
                        scheduled_for,
                        attempts: 0,
                        status: OutboxStatus::Pending,
                    };
                    self.store.append_outbox_alert(&alert).await?;
                    self.enqueue_deliver(alert.id).await?;
                    created += 1;
                    continue;
                }

                let dedup_key =
                    format!("alert:{}:{}:{}", rule.user_id, method_tag(rule.method), filing.id);
                let alert = OutboxAlert {
                    id: Uuid::new_v4(),
                    user_id: rule.user_id,
                    method: rule.method,
                    recipient: rule.user_id.to_string(),
                    title: format!("Material filing change: {}", company.name),
                    body: summary_line,
                    priority: JobPriority::High,
                    dedup_key,
                    scheduled_for,
                    attempts: 0,
                    status: OutboxStatus::Pending,
                };
                self.store.append_outbox_alert(&alert).await?;
                self.enqueue_deliver(alert.id).await?;
                created += 1;
            }
        }

        self.metrics.incr_alerts_enqueued();
        Ok(Some(serde_json::json!({ "alertsCreated": created })))
    }
}

impl AlertFanoutHandler {
    async fn enqueue_deliver(&self, outbox_alert_id: Uuid) -> CoreResult<()> {
        let job = Job::new(JobParameters::Deliver { outbox_alert_id }, JobPriority::High)
            .with_dedup_key(format!("deliver:{outbox_alert_id}"));
        self.store.enqueue(job).await?;
        Ok(())
    }
}

fn method_tag(method: crate::models::DeliveryMethod) -> &'static str {
    use crate::models::DeliveryMethod::*;
    match method {
        Email => "email",
        Sms => "sms",
        Push => "push",
    }
}

/// The coalescing bucket a non-IMMEDIATE alert falls into: HOURLY groups by
/// hour, DAILY by local calendar day, WEEKLY by ISO week. All computed in UTC
/// since coalescing windows need not track the user's own quiet-hours zone.
fn coalesce_bucket_key(
    frequency: AlertFrequency,
    user_id: Uuid,
    method: crate::models::DeliveryMethod,
    now: chrono::DateTime<Utc>,
) -> String {
    let bucket = match frequency {
        AlertFrequency::Hourly => now.format("%Y-%m-%dT%H").to_string(),
        AlertFrequency::Daily => now.format("%Y-%m-%d").to_string(),
        AlertFrequency::Weekly => format!("{}-W{:02}", now.iso_week().year(), now.iso_week().week()),
        AlertFrequency::Immediate => now.to_rfc3339(),
    };
    format!("{}:{}:{}:{}", frequency_tag(frequency), user_id, method_tag(method), bucket)
}

fn frequency_tag(f: AlertFrequency) -> &'static str {
    match f {
        AlertFrequency::Immediate => "immediate",
        AlertFrequency::Hourly => "hourly",
        AlertFrequency::Daily => "daily",
        AlertFrequency::Weekly => "weekly",
    }
}

/// If `now` (converted into the rule's timezone) falls inside `[start, end)`,
/// returns the UTC instant the window next exits; otherwise `None` (send now).
fn next_window_exit(qh: &crate::models::QuietHours, now: chrono::DateTime<Utc>) -> Option<chrono::DateTime<Utc>> {
    let tz: chrono_tz::Tz = qh.timezone.parse().ok()?;
    let local = now.with_timezone(&tz);
    let start = parse_hhmm(&qh.start)?;
    let end = parse_hhmm(&qh.end)?;
    let current_minutes = local.time().num_seconds_from_midnight() as i64 / 60;

    let in_window = if start <= end {
        current_minutes >= start && current_minutes < end
    } else {
        // Window wraps past midnight (e.g. 22:00-06:00).
        current_minutes >= start || current_minutes < end
    };
    if !in_window {
        return None;
    }

    let exit_minutes = end;
    let mut exit_date = local.date_naive();
    if exit_minutes <= current_minutes && start > end {
        exit_date = exit_date.succ_opt().unwrap_or(exit_date);
    }
    let exit_naive = exit_date.and_hms_opt((exit_minutes / 60) as u32, (exit_minutes % 60) as u32, 0)?;
    let exit_local = tz.from_local_datetime(&exit_naive).single()?;
    Some(exit_local.with_timezone(&Utc))
}

fn parse_hhmm(s: &str) -> Option<i64> {
    let (h, m) = s.split_once(':')?;
    Some(h.parse::<i64>().ok()? * 60 + m.parse::<i64>().ok()?)
}
