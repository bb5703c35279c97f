// =============================================================================
// edgar/mod.rs — THE EDGAR FETCHER
// =============================================================================
//
// A polite HTTP client for SEC EDGAR: submissions, filing indexes, document
// bodies, and the ticker catalogue. Every request passes through the shared
// rate limiter and a circuit breaker before it touches the network, and
// retries 429/5xx with `delay = max(server_retry_after, 2^attempt * 1s)`.
//
// CIK and accession-number normalization happen at the edges: callers may
// pass either form, the fetcher always produces the right one for the URL
// it's building.
// =============================================================================

pub mod model;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{CoreError, CoreResult};
use crate::models::{accession_for_archive_path, cik_for_archive_path, normalize_cik};
use crate::rate_limiter::RateLimiter;
use model::{
    CompanyMatch, CompanyTickersResponse, FilingContent, FilingMeta, SubmissionsResponse,
};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EDGAR_BUCKET: &str = "edgar";

pub struct CompanyInfo {
    pub cik: String,
    pub name: String,
    pub sic: Option<String>,
    pub sic_description: Option<String>,
    pub tickers: Vec<String>,
}

#[derive(Default, Clone, Copy)]
pub struct FilingQuery<'a> {
    pub form: Option<&'a str>,
    pub after: Option<chrono::DateTime<chrono::Utc>>,
    pub before: Option<chrono::DateTime<chrono::Utc>>,
    pub count: Option<usize>,
}

pub struct EdgarFetcher {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    circuit: CircuitBreaker,
    rate_limit_per_sec: u32,
    max_retries: u32,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl EdgarFetcher {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        limiter: Arc<RateLimiter>,
        rate_limit_per_sec: u32,
        max_retries: u32,
        cb_failure_threshold: u32,
        cb_reset_timeout: Duration,
        cb_success_threshold: u32,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build EDGAR client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            limiter,
            circuit: CircuitBreaker::new(
                "EDGAR",
                cb_failure_threshold,
                cb_reset_timeout,
                cb_success_threshold,
            ),
            rate_limit_per_sec,
            max_retries,
            request_timeout,
            shutdown,
        })
    }

    pub async fn get_submissions(&self, cik: &str) -> CoreResult<(CompanyInfo, Vec<FilingMeta>)> {
        let normalized = normalize_cik(cik);
        if normalized.trim_start_matches('0').is_empty() {
            return Err(CoreError::Validation(format!("invalid cik: {cik}")));
        }
        let url = format!("{}/submissions/CIK{}.json", self.base_url, normalized);
        let body = self.get_json::<SubmissionsResponse>(&url).await?;

        let filings = body.filings.recent.pivot()?;
        let info = CompanyInfo {
            cik: normalized,
            name: body.name,
            sic: body.sic,
            sic_description: body.sic_description,
            tickers: body.tickers,
        };
        Ok((info, filings))
    }

    pub async fn get_filings(&self, cik: &str, query: FilingQuery<'_>) -> CoreResult<Vec<FilingMeta>> {
        let (_, mut filings) = self.get_submissions(cik).await?;
        filings.retain(|f| {
            query.form.map(|form| f.form_type == form).unwrap_or(true)
                && query.after.map(|a| f.filed_date >= a).unwrap_or(true)
                && query.before.map(|b| f.filed_date <= b).unwrap_or(true)
        });
        filings.sort_by(|a, b| b.filed_date.cmp(&a.filed_date));
        if let Some(count) = query.count {
            filings.truncate(count);
        }
        Ok(filings)
    }

    pub async fn get_filing_content(
        &self,
        cik: &str,
        accession_no: &str,
    ) -> CoreResult<FilingContent> {
        let normalized_cik = normalize_cik(cik);
        let archive_cik = cik_for_archive_path(&normalized_cik);
        let archive_accession = accession_for_archive_path(accession_no);

        let index_url = format!(
            "{}/Archives/edgar/data/{}/{}/{}-index.html",
            self.base_url, archive_cik, archive_accession, accession_no
        );
        let index_html = self.get_text(&index_url).await?;
        let documents = discover_documents(&index_html);
        let primary = select_primary_document(&documents)
            .ok_or_else(|| CoreError::NotFound(format!("no documents in index for {accession_no}")))?;

        let doc_url = format!(
            "{}/Archives/edgar/data/{}/{}/{}",
            self.base_url, archive_cik, archive_accession, primary
        );
        let primary_text = self.get_text(&doc_url).await?;

        Ok(FilingContent {
            documents: documents.into_iter().map(|(name, _)| name).collect(),
            primary_text,
        })
    }

    pub async fn search_companies(&self, query: &str) -> CoreResult<Vec<CompanyMatch>> {
        let url = format!("{}/files/company_tickers.json", self.base_url);
        let catalogue = self.get_json::<CompanyTickersResponse>(&url).await?;
        let needle = query.to_lowercase();

        let mut matches: Vec<CompanyMatch> = catalogue
            .0
            .values()
            .filter(|entry| {
                entry.title.to_lowercase().contains(&needle)
                    || entry.ticker.to_lowercase() == needle
            })
            .map(|entry| CompanyMatch {
                cik: normalize_cik(&entry.cik_str.to_string()),
                name: entry.title.clone(),
                ticker: Some(entry.ticker.clone()),
            })
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }

    async fn get_text(&self, url: &str) -> CoreResult<String> {
        let resp = self.get_with_retry(url).await?;
        Ok(resp.text().await.map_err(CoreError::from)?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        let resp = self.get_with_retry(url).await?;
        let bytes = resp.bytes().await.map_err(CoreError::from)?;
        serde_json::from_slice(&bytes).map_err(CoreError::from)
    }

    async fn get_with_retry(&self, url: &str) -> CoreResult<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            if !self.circuit.allow_request() {
                return Err(CoreError::TransientTransport(
                    "EDGAR circuit breaker is open".into(),
                ));
            }

            self.limiter
                .acquire(EDGAR_BUCKET, self.rate_limit_per_sec, Duration::from_secs(1), &self.shutdown)
                .await?;

            let result = tokio::select! {
                r = self.client.get(url).send() => r,
                _ = tokio::time::sleep(self.request_timeout) => {
                    self.circuit.record_failure();
                    return Err(CoreError::TransientTransport(format!("{url} timed out after {:?}", self.request_timeout)));
                }
                _ = self.shutdown.cancelled() => {
                    return Err(CoreError::Cancelled(format!("{url} aborted: shutting down")));
                }
            };
            match result {
                Ok(resp) if resp.status().is_success() => {
                    self.circuit.record_success();
                    return Ok(resp);
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    self.circuit.record_success();
                    return Err(CoreError::NotFound(format!("{url} returned 404")));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs);
                    self.circuit.record_failure();

                    if attempt >= self.max_retries {
                        return Err(if status.as_u16() == 429 {
                            CoreError::RateLimited(format!("{url} exhausted retries at 429"))
                        } else {
                            CoreError::TransientTransport(format!("{url} returned {status}"))
                        });
                    }

                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                    let delay = retry_after.unwrap_or(backoff).max(backoff);
                    warn!(url, %status, attempt, delay_ms = delay.as_millis() as u64, "EDGAR request failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            return Err(CoreError::Cancelled(format!("{url} aborted during retry backoff: shutting down")));
                        }
                    }
                    attempt += 1;
                }
                Err(e) => {
                    self.circuit.record_failure();
                    if attempt >= self.max_retries {
                        return Err(CoreError::from(e));
                    }
                    let delay = Duration::from_secs(2u64.saturating_pow(attempt));
                    debug!(url, attempt, "EDGAR request transport error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            return Err(CoreError::Cancelled(format!("{url} aborted during retry backoff: shutting down")));
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Parses a filing index page into `(document, type)` pairs. EDGAR's index
/// tables are simple enough that a couple of regexes suffice; we don't need
/// a full HTML parser for this.
fn discover_documents(index_html: &str) -> Vec<(String, String)> {
    let row_re = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap();
    let href_re = Regex::new(r#"(?is)<a[^>]+href="([^"]+)"[^>]*>"#).unwrap();
    let cell_re = Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap();

    let mut out = Vec::new();
    for row_caps in row_re.captures_iter(index_html) {
        let row = &row_caps[1];
        let Some(href_caps) = href_re.captures(row) else {
            continue;
        };
        let href = href_caps[1].to_string();
        let document = href.rsplit('/').next().unwrap_or(&href).to_string();

        let cells: Vec<String> = cell_re
            .captures_iter(row)
            .map(|c| strip_tags(&c[1]))
            .collect();
        // EDGAR's index table layout is Seq, Description, Document, Type, Size;
        // the "Type" cell is conventionally the fourth.
        let doc_type = cells.get(3).cloned().unwrap_or_default();
        out.push((document, doc_type));
    }
    out
}

fn strip_tags(s: &str) -> String {
    Regex::new(r"<[^>]+>").unwrap().replace_all(s, "").trim().to_string()
}

/// Selects the first document whose type is `filing`, falling back to the
/// first entry (§4.C: "missing/ambiguous documents").
fn select_primary_document(documents: &[(String, String)]) -> Option<String> {
    documents
        .iter()
        .find(|(_, doc_type)| doc_type.eq_ignore_ascii_case("filing"))
        .or_else(|| documents.first())
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_filing_typed_document_first() {
        let docs = vec![
            ("exhibit.htm".to_string(), "EX-10.1".to_string()),
            ("aapl-20230930.htm".to_string(), "10-K".to_string()),
        ];
        // Neither is literally "filing"-typed in this fixture, so it falls
        // back to the first entry.
        assert_eq!(select_primary_document(&docs), Some("exhibit.htm".to_string()));

        let docs_with_filing = vec![
            ("exhibit.htm".to_string(), "EX-10.1".to_string()),
            ("primary.htm".to_string(), "filing".to_string()),
        ];
        assert_eq!(
            select_primary_document(&docs_with_filing),
            Some("primary.htm".to_string())
        );
    }

    #[test]
    fn discovers_documents_from_index_table() {
        let html = r#"
            <table>
              <tr><td>1</td><td>10-K</td><td><a href="/Archives/edgar/data/320193/000032019323000064/aapl-20230930.htm">aapl-20230930.htm</a></td><td>10-K</td><td>500000</td></tr>
            </table>
        "#;
        let docs = discover_documents(html);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "aapl-20230930.htm");
        assert_eq!(docs[0].1, "10-K");
    }

    #[test]
    fn empty_cik_is_rejected_before_any_request() {
        assert_eq!(normalize_cik("abc"), "0000000000");
    }
}
