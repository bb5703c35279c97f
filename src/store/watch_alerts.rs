use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    AlertRule, AlertType, DeliveryMethod, JobPriority, OutboxAlert, OutboxStatus, QuietHours,
    Watchlist,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

fn alert_type_str(t: AlertType) -> &'static str {
    match t {
        AlertType::MaterialChange => "MATERIAL_CHANGE",
        AlertType::PriceChange => "PRICE_CHANGE",
    }
}

fn parse_alert_type(s: &str) -> AlertType {
    match s {
        "PRICE_CHANGE" => AlertType::PriceChange,
        _ => AlertType::MaterialChange,
    }
}

fn method_str(m: DeliveryMethod) -> &'static str {
    match m {
        DeliveryMethod::Email => "EMAIL",
        DeliveryMethod::Sms => "SMS",
        DeliveryMethod::Push => "PUSH",
    }
}

fn parse_method(s: &str) -> DeliveryMethod {
    match s {
        "SMS" => DeliveryMethod::Sms,
        "PUSH" => DeliveryMethod::Push,
        _ => DeliveryMethod::Email,
    }
}

fn priority_str(p: JobPriority) -> &'static str {
    match p {
        JobPriority::Low => "LOW",
        JobPriority::Normal => "NORMAL",
        JobPriority::High => "HIGH",
    }
}

fn parse_priority(s: &str) -> JobPriority {
    match s {
        "HIGH" => JobPriority::High,
        "LOW" => JobPriority::Low,
        _ => JobPriority::Normal,
    }
}

impl Store {
    pub async fn list_active_watchlists_for_company(
        &self,
        company_id: Uuid,
    ) -> CoreResult<Vec<Watchlist>> {
        let rows = sqlx::query(
            "SELECT * FROM watchlists WHERE company_id = ? AND is_active = 1",
        )
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_watchlist).collect()
    }

    pub async fn list_alert_rules_for_user(&self, user_id: Uuid) -> CoreResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT * FROM alert_rules WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_alert_rule).collect()
    }

    /// Finds a still-pending OutboxAlert for the same `(user, method, dedupKey
    /// prefix)` bucket, used to coalesce non-IMMEDIATE frequencies instead of
    /// creating a new alert per filing.
    pub async fn find_coalescable_outbox(
        &self,
        user_id: Uuid,
        method: DeliveryMethod,
        bucket_key: &str,
    ) -> CoreResult<Option<OutboxAlert>> {
        let row = sqlx::query(
            "SELECT * FROM outbox_alerts
             WHERE user_id = ? AND method = ? AND status = 'PENDING' AND dedup_key = ?
             LIMIT 1",
        )
        .bind(user_id.to_string())
        .bind(method_str(method))
        .bind(bucket_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_outbox).transpose()
    }

    pub async fn append_outbox_alert(&self, alert: &OutboxAlert) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO outbox_alerts
             (id, user_id, method, recipient, title, body, priority, dedup_key, scheduled_for,
              attempts, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(alert.id.to_string())
        .bind(alert.user_id.to_string())
        .bind(method_str(alert.method))
        .bind(&alert.recipient)
        .bind(&alert.title)
        .bind(&alert.body)
        .bind(priority_str(alert.priority))
        .bind(&alert.dedup_key)
        .bind(alert.scheduled_for)
        .bind(alert.attempts)
        .bind("PENDING")
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_to_coalesced_body(&self, id: Uuid, extra_line: &str) -> CoreResult<()> {
        let existing = self.get_outbox_alert(id).await?;
        let body = format!("{}\n{}", existing.body, extra_line);
        sqlx::query("UPDATE outbox_alerts SET body = ? WHERE id = ?")
            .bind(body)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_outbox_alert(&self, id: Uuid) -> CoreResult<OutboxAlert> {
        let row = sqlx::query("SELECT * FROM outbox_alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("outbox alert {id}")))?;
        row_to_outbox(row)
    }

    pub async fn mark_outbox_sent(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE outbox_alerts SET status = 'SENT', attempts = attempts + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_outbox_failed(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(
            "UPDATE outbox_alerts SET status = 'FAILED', attempts = attempts + 1 WHERE id = ?",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes SENT/FAILED outbox alerts scheduled before the cutoff.
    pub async fn purge_terminal_outbox_older_than(&self, max_age: chrono::Duration) -> CoreResult<u64> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            "DELETE FROM outbox_alerts WHERE status IN ('SENT', 'FAILED') AND scheduled_for <= ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_watchlist(row: sqlx::sqlite::SqliteRow) -> CoreResult<Watchlist> {
    let user_id: String = row.try_get("user_id")?;
    let company_id: String = row.try_get("company_id")?;
    let alert_types: String = row.try_get("alert_types")?;
    let alert_types: Vec<String> = serde_json::from_str(&alert_types).unwrap_or_default();
    Ok(Watchlist {
        user_id: Uuid::parse_str(&user_id).map_err(|e| CoreError::Internal(e.to_string()))?,
        company_id: Uuid::parse_str(&company_id).map_err(|e| CoreError::Internal(e.to_string()))?,
        alert_types: alert_types.iter().map(|s| parse_alert_type(s)).collect(),
        price_change_threshold: row.try_get("price_change_threshold")?,
        is_active: row.try_get("is_active")?,
    })
}

fn row_to_alert_rule(row: sqlx::sqlite::SqliteRow) -> CoreResult<AlertRule> {
    let user_id: String = row.try_get("user_id")?;
    let alert_type: String = row.try_get("alert_type")?;
    let method: String = row.try_get("method")?;
    let frequency: String = row.try_get("frequency")?;
    let quiet_hours: Option<String> = row.try_get("quiet_hours")?;
    Ok(AlertRule {
        user_id: Uuid::parse_str(&user_id).map_err(|e| CoreError::Internal(e.to_string()))?,
        alert_type: parse_alert_type(&alert_type),
        method: parse_method(&method),
        is_enabled: row.try_get("is_enabled")?,
        threshold: row.try_get("threshold")?,
        frequency: match frequency.as_str() {
            "HOURLY" => crate::models::AlertFrequency::Hourly,
            "DAILY" => crate::models::AlertFrequency::Daily,
            "WEEKLY" => crate::models::AlertFrequency::Weekly,
            _ => crate::models::AlertFrequency::Immediate,
        },
        quiet_hours: quiet_hours.and_then(|q| serde_json::from_str::<QuietHours>(&q).ok()),
    })
}

fn row_to_outbox(row: sqlx::sqlite::SqliteRow) -> CoreResult<OutboxAlert> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let method: String = row.try_get("method")?;
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    Ok(OutboxAlert {
        id: Uuid::parse_str(&id).map_err(|e| CoreError::Internal(e.to_string()))?,
        user_id: Uuid::parse_str(&user_id).map_err(|e| CoreError::Internal(e.to_string()))?,
        method: parse_method(&method),
        recipient: row.try_get("recipient")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        priority: parse_priority(&priority),
        dedup_key: row.try_get("dedup_key")?,
        scheduled_for: row.try_get::<DateTime<Utc>, _>("scheduled_for")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        status: match status.as_str() {
            "SENT" => OutboxStatus::Sent,
            "FAILED" => OutboxStatus::Failed,
            _ => OutboxStatus::Pending,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPriority;

    #[tokio::test]
    async fn append_and_coalesce_outbox_alert() {
        let store = Store::in_memory().await.unwrap();
        let user_id = Uuid::new_v4();
        let alert = OutboxAlert {
            id: Uuid::new_v4(),
            user_id,
            method: DeliveryMethod::Email,
            recipient: "user@example.test".into(),
            title: "Material change".into(),
            body: "Apple Inc. filed a 10-K with a material change.".into(),
            priority: JobPriority::Normal,
            dedup_key: "hourly:user:email:2026-07-27T14".into(),
            scheduled_for: Utc::now(),
            attempts: 0,
            status: OutboxStatus::Pending,
        };
        store.append_outbox_alert(&alert).await.unwrap();

        let found = store
            .find_coalescable_outbox(user_id, DeliveryMethod::Email, &alert.dedup_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, alert.id);

        store.append_to_coalesced_body(alert.id, "Another filing changed too.").await.unwrap();
        let updated = store.get_outbox_alert(alert.id).await.unwrap();
        assert!(updated.body.contains("Another filing changed too."));
    }
}
