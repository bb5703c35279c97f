// =============================================================================
// models.rs — THE DATA MODEL
// =============================================================================
//
// Every entity that flows through the store lives here: Company, Filing,
// Section, Diff, Job, Watchlist, AlertRule, OutboxAlert. These are plain
// serde structs; the `store` module is the only place that knows how they
// map onto rows.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Zero-pads a CIK to the 10 digits EDGAR's API paths expect, after
/// stripping anything that isn't a digit.
pub fn normalize_cik(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{digits:0>10}")
}

/// Strips leading zeros for archive-path CIKs (EDGAR's `/Archives/...` URLs
/// use the un-padded form).
pub fn cik_for_archive_path(normalized: &str) -> String {
    let trimmed = normalized.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Strips dashes from an accession number for archive paths, e.g.
/// `0000320193-23-000064` → `000032019323000064`.
pub fn accession_for_archive_path(accession: &str) -> String {
    accession.replace('-', "")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    /// 10-digit zero-padded CIK.
    pub cik: String,
    pub symbol: Option<String>,
    pub name: String,
    pub sic: Option<String>,
    pub industry: Option<String>,
    pub is_active: bool,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Company {
    pub fn new(cik: &str, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cik: normalize_cik(cik),
            symbol: None,
            name: name.into(),
            sic: None,
            industry: None,
            is_active: true,
            last_polled_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Addition,
    Deletion,
    Modification,
    Unchanged,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeType::Addition => "ADDITION",
            ChangeType::Deletion => "DELETION",
            ChangeType::Modification => "MODIFICATION",
            ChangeType::Unchanged => "UNCHANGED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filing {
    pub id: Uuid,
    pub company_id: Uuid,
    /// 10-digit zero-padded CIK, denormalized for fast lookups.
    pub cik: String,
    /// Canonical dashed form, e.g. `0000320193-23-000064`.
    pub accession_no: String,
    pub form_type: String,
    pub filed_date: DateTime<Utc>,
    pub report_date: Option<DateTime<Utc>>,
    pub url: String,
    pub raw_content: String,
    pub summary: Option<String>,
    pub key_highlights: Vec<String>,
    pub material_changes: u32,
    pub risk_factor_changes: u32,
    pub business_changes: u32,
    pub is_processed: bool,
}

impl Filing {
    pub fn new(
        company_id: Uuid,
        cik: &str,
        accession_no: &str,
        form_type: impl Into<String>,
        filed_date: DateTime<Utc>,
        url: impl Into<String>,
        raw_content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            cik: normalize_cik(cik),
            accession_no: accession_no.to_string(),
            form_type: form_type.into(),
            filed_date,
            report_date: None,
            url: url.into(),
            raw_content: raw_content.into(),
            summary: None,
            key_highlights: Vec::new(),
            material_changes: 0,
            risk_factor_changes: 0,
            business_changes: 0,
            is_processed: false,
        }
    }

    pub fn with_report_date(mut self, report_date: Option<DateTime<Utc>>) -> Self {
        self.report_date = report_date;
        self
    }

    /// Form types considered comparable to `form_type` when hunting for a
    /// prior filing to diff against (10-Q may fall back to 10-K).
    pub fn comparable_form_types(form_type: &str) -> &'static [&'static str] {
        match form_type {
            "10-Q" => &["10-Q", "10-K"],
            "10-K" => &["10-K"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub filing_id: Uuid,
    /// Canonical tag (see the section tag table) or a normalized heuristic
    /// name for unknown form types.
    pub section_type: String,
    pub name: String,
    pub order: u32,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub id: Uuid,
    pub filing_id: Uuid,
    pub previous_filing_id: Uuid,
    pub section: String,
    pub change_type: ChangeType,
    pub summary: String,
    pub impact: String,
    /// In [0, 1], rounded to two decimals.
    pub materiality_score: f64,
    pub before_text: Option<String>,
    pub after_text: Option<String>,
    pub line_number: Option<u32>,
}

impl Diff {
    pub fn is_material(&self) -> bool {
        self.materiality_score >= 0.7
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Poll,
    Ingest,
    Diff,
    AlertFanout,
    Deliver,
    PriceRefresh,
    Cleanup,
}

impl JobType {
    /// Soft deadline before the job is considered overdue (§5).
    pub fn default_deadline(self) -> std::time::Duration {
        use std::time::Duration;
        match self {
            JobType::Ingest => Duration::from_secs(600),
            JobType::Poll => Duration::from_secs(300),
            JobType::Deliver => Duration::from_secs(60),
            _ => Duration::from_secs(300),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Poll => "POLL",
            JobType::Ingest => "INGEST",
            JobType::Diff => "DIFF",
            JobType::AlertFanout => "ALERT_FANOUT",
            JobType::Deliver => "DELIVER",
            JobType::PriceRefresh => "PRICE_REFRESH",
            JobType::Cleanup => "CLEANUP",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

/// Typed job payloads, one variant per `JobType`, parsed once at pull time
/// instead of carried around as an open JSON map (Design Note: dynamic
/// typing / parameter maps).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParameters {
    Poll {
        cik: String,
    },
    Ingest {
        cik: String,
        accession_no: String,
        form_type: String,
        force_reprocess: bool,
        generate_alerts: bool,
    },
    AlertFanout {
        filing_id: Uuid,
    },
    Deliver {
        outbox_alert_id: Uuid,
    },
    PriceRefresh {
        symbol: String,
    },
    Cleanup,
}

impl JobParameters {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParameters::Poll { .. } => JobType::Poll,
            JobParameters::Ingest { .. } => JobType::Ingest,
            JobParameters::AlertFanout { .. } => JobType::AlertFanout,
            JobParameters::Deliver { .. } => JobType::Deliver,
            JobParameters::PriceRefresh { .. } => JobType::PriceRefresh,
            JobParameters::Cleanup => JobType::Cleanup,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub parameters: JobParameters,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub dedup_key: Option<String>,
}

impl Job {
    pub fn new(parameters: JobParameters, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: parameters.job_type(),
            status: JobStatus::Pending,
            priority,
            parameters,
            scheduled_for: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            result: None,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_scheduled_for(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = when;
        self
    }

    /// `delay = min(30s, 2^retry_count * 1s)`, per the retry-with-backoff contract.
    pub fn next_retry_delay(retry_count: u32) -> chrono::Duration {
        let secs = 2u64.saturating_pow(retry_count).min(30);
        chrono::Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    MaterialChange,
    PriceChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    Email,
    Sms,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertFrequency {
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub alert_types: Vec<AlertType>,
    pub price_change_threshold: Option<f64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: String,
    pub end: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub user_id: Uuid,
    pub alert_type: AlertType,
    pub method: DeliveryMethod,
    pub is_enabled: bool,
    pub threshold: Option<f64>,
    pub frequency: AlertFrequency,
    pub quiet_hours: Option<QuietHours>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method: DeliveryMethod,
    pub recipient: String,
    pub title: String,
    pub body: String,
    pub priority: JobPriority,
    pub dedup_key: String,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: u32,
    pub status: OutboxStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_cik_padding() {
        assert_eq!(normalize_cik("320193"), "0000320193");
        assert_eq!(normalize_cik("CIK0000320193"), "0000320193");
    }

    #[test]
    fn archive_path_strips_leading_zeros() {
        assert_eq!(cik_for_archive_path("0000320193"), "320193");
        assert_eq!(cik_for_archive_path("0000000000"), "0");
    }

    #[test]
    fn accession_archive_form_strips_dashes() {
        assert_eq!(
            accession_for_archive_path("0000320193-23-000064"),
            "000032019323000064"
        );
    }

    #[test]
    fn tenq_falls_back_to_tenk() {
        assert_eq!(Filing::comparable_form_types("10-Q"), &["10-Q", "10-K"]);
        assert_eq!(Filing::comparable_form_types("10-K"), &["10-K"]);
        assert!(Filing::comparable_form_types("8-K").is_empty());
    }

    #[test]
    fn diff_material_threshold() {
        let mut d = Diff {
            id: Uuid::new_v4(),
            filing_id: Uuid::new_v4(),
            previous_filing_id: Uuid::new_v4(),
            section: "BUSINESS".into(),
            change_type: ChangeType::Modification,
            summary: String::new(),
            impact: String::new(),
            materiality_score: 0.69,
            before_text: None,
            after_text: None,
            line_number: None,
        };
        assert!(!d.is_material());
        d.materiality_score = 0.7;
        assert!(d.is_material());
    }

    #[test]
    fn retry_delay_caps_at_30s() {
        assert_eq!(Job::next_retry_delay(0), chrono::Duration::seconds(1));
        assert_eq!(Job::next_retry_delay(3), chrono::Duration::seconds(8));
        assert_eq!(Job::next_retry_delay(10), chrono::Duration::seconds(30));
    }
}
