// =============================================================================
// edgar/model.rs — THE WIRE SHAPES
// =============================================================================
//
// EDGAR's submissions JSON comes back as "parallel arrays": `accessionNumber`,
// `form`, `filingDate`, etc. are each a `Vec`, and row `i` of one corresponds
// to row `i` of all the others. `RecentFilings` holds that shape as-is;
// `FilingMeta` is the row-oriented record the rest of the crate actually
// works with, built via `TryFrom<(&RecentFilings, usize)>`.
// =============================================================================

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SubmissionsResponse {
    pub cik: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "sicDescription", default)]
    pub sic_description: Option<String>,
    #[serde(default)]
    pub sic: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    pub filings: FilingsData,
}

#[derive(Debug, Deserialize)]
pub struct FilingsData {
    pub recent: RecentFilings,
}

/// Parallel arrays straight off the wire: `accession_number[i]` and
/// `form[i]` describe the same filing.
#[derive(Debug, Deserialize)]
pub struct RecentFilings {
    #[serde(rename = "accessionNumber")]
    pub accession_number: Vec<String>,
    pub form: Vec<String>,
    #[serde(rename = "filingDate")]
    pub filing_date: Vec<String>,
    #[serde(rename = "reportDate", default)]
    pub report_date: Vec<String>,
    #[serde(rename = "primaryDocument", default)]
    pub primary_document: Vec<String>,
}

fn get_at(v: &[String], i: usize) -> Option<String> {
    v.get(i).filter(|s| !s.is_empty()).cloned()
}

/// Row-oriented view of one filing, pivoted out of the parallel arrays.
#[derive(Debug, Clone)]
pub struct FilingMeta {
    pub accession_no: String,
    pub form_type: String,
    pub filed_date: DateTime<Utc>,
    pub report_date: Option<DateTime<Utc>>,
    pub primary_document: Option<String>,
}

impl TryFrom<(&RecentFilings, usize)> for FilingMeta {
    type Error = CoreError;

    fn try_from((recent, i): (&RecentFilings, usize)) -> CoreResult<Self> {
        let accession_no = recent
            .accession_number
            .get(i)
            .cloned()
            .ok_or_else(|| CoreError::Internal(format!("missing accessionNumber at row {i}")))?;
        let form_type = recent
            .form
            .get(i)
            .cloned()
            .ok_or_else(|| CoreError::Internal(format!("missing form at row {i}")))?;
        let filed_date_str = recent
            .filing_date
            .get(i)
            .cloned()
            .ok_or_else(|| CoreError::Internal(format!("missing filingDate at row {i}")))?;
        let filed_date = parse_date(&filed_date_str)?;
        let report_date = get_at(&recent.report_date, i)
            .map(|s| parse_date(&s))
            .transpose()?;
        let primary_document = get_at(&recent.primary_document, i);

        Ok(FilingMeta {
            accession_no,
            form_type,
            filed_date,
            report_date,
            primary_document,
        })
    }
}

fn parse_date(s: &str) -> CoreResult<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
        .map_err(|e| CoreError::ProviderMalformed(format!("bad date {s}: {e}")))
}

impl RecentFilings {
    pub fn pivot(&self) -> CoreResult<Vec<FilingMeta>> {
        (0..self.accession_number.len())
            .map(|i| FilingMeta::try_from((self, i)))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct CompanyTickersResponse(pub std::collections::HashMap<String, CompanyTickerEntry>);

#[derive(Debug, Deserialize)]
pub struct CompanyTickerEntry {
    pub cik_str: serde_json::Value,
    pub ticker: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct CompanyMatch {
    pub cik: String,
    pub name: String,
    pub ticker: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FilingContent {
    pub documents: Vec<String>,
    pub primary_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivots_parallel_arrays_into_rows() {
        let recent = RecentFilings {
            accession_number: vec!["0000320193-23-000064".into(), "0000320193-23-000050".into()],
            form: vec!["10-K".into(), "10-Q".into()],
            filing_date: vec!["2023-11-03".into(), "2023-08-04".into()],
            report_date: vec!["2023-09-30".into(), String::new()],
            primary_document: vec!["aapl-20230930.htm".into(), String::new()],
        };
        let rows = recent.pivot().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].accession_no, "0000320193-23-000064");
        assert_eq!(rows[0].form_type, "10-K");
        assert!(rows[0].report_date.is_some());
        assert!(rows[1].report_date.is_none());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let recent = RecentFilings {
            accession_number: vec!["0000320193-23-000064".into()],
            form: vec![],
            filing_date: vec!["2023-11-03".into()],
            report_date: vec![],
            primary_document: vec![],
        };
        assert!(recent.pivot().is_err());
    }
}
