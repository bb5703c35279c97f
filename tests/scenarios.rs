// End-to-end coverage for the six testable scenarios: first ingest (S1),
// subsequent ingest with a material change (S2), job dedup (S3), quote
// provider failover (S4), stale-quote fallback (S5), and the rate limiter's
// window bound (S6).
//
// The EDGAR Fetcher itself talks to the real network, so these scenarios
// exercise the rest of the pipeline (Store, Section Extractor, Diff Engine,
// Materiality Analyzer, Job Queue, Price Adapter) directly against an
// in-memory SQLite pool and stub providers, the same composition
// `IngestHandler` and friends perform once a filing's text is in hand.
// Filing-index scraping itself is covered by `edgar::tests`; the stale-quote
// half of S5 lives alongside the cache internals in `price::tests`.

use async_trait::async_trait;
use chrono::Utc;
use filing_watch_engine::analysis::diff_engine::compare_filings;
use filing_watch_engine::analysis::section_extractor::extract_sections;
use filing_watch_engine::error::{CoreError, CoreResult};
use filing_watch_engine::models::{Filing, JobParameters, JobPriority, JobStatus};
use filing_watch_engine::price::cache::InMemoryQuoteCache;
use filing_watch_engine::price::providers::QuoteProvider;
use filing_watch_engine::price::{GetQuoteOptions, Period, PriceAdapter, RawQuote};
use filing_watch_engine::rate_limiter::RateLimiter;
use filing_watch_engine::store::Store;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct StubProvider {
    name: &'static str,
    fail: bool,
}

#[async_trait]
impl QuoteProvider for StubProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
        if self.fail {
            return Err(CoreError::TransientTransport(format!("{} unreachable", self.name)));
        }
        Ok(RawQuote {
            symbol: symbol.to_string(),
            current: 210.0,
            open: 205.0,
            high: 212.0,
            low: 204.0,
            previous_close: 207.0,
            volume: 42_000,
            market_cap: None,
            sparkline: vec![207.0; period.sparkline_len().min(5)],
        })
    }
}

const FIRST_10K: &str = "\
ITEM 1. BUSINESS
We design, manufacture, and sell consumer electronics.

ITEM 1A. RISK FACTORS
Our revenue depends on a small number of suppliers.
";

const SECOND_10K_MATERIAL: &str = "\
ITEM 1. BUSINESS
We design, manufacture, and sell consumer electronics.

ITEM 1A. RISK FACTORS
We are a defendant in material litigation that could result in a significant
restatement of prior financial statements if the outcome is adverse. This
represents a material adverse change in our risk profile.
";

/// S1: a company's first filing has no prior comparable filing, so every
/// section counts as ADDITION and there is nothing to diff against.
#[tokio::test]
async fn s1_first_ingest_has_no_material_changes_against_empty_history() {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    let company = store.upsert_company("320193", "Apple Inc.", Some("AAPL")).await.unwrap();

    let filing = Filing::new(
        company.id,
        "320193",
        "0000320193-23-000064",
        "10-K",
        Utc::now(),
        "https://www.sec.gov/Archives/edgar/data/320193/000032019323000064-index.html",
        FIRST_10K,
    );
    let draft = store.upsert_filing_draft(&filing).await.unwrap();

    let comparison = compare_filings(draft.id, Uuid::nil(), None, FIRST_10K, "10-K");
    let sections = extract_sections(draft.id, FIRST_10K, "10-K");
    let diffs: Vec<_> = comparison.section_diffs.iter().map(|sd| sd.diff.clone()).collect();

    store.persist_ingestion_result(draft.id, &sections, &diffs).await.unwrap();

    let processed = store.get_filing(draft.id).await.unwrap();
    assert!(processed.is_processed);
    assert_eq!(processed.material_changes, 0, "a first-ever filing has nothing to compare against");
    assert!(diffs.iter().all(|d| d.change_type == filing_watch_engine::models::ChangeType::Addition));
}

/// S2: the second 10-K introduces litigation/restatement language in
/// RISK FACTORS, which the keyword banks should flag as material.
#[tokio::test]
async fn s2_subsequent_ingest_flags_material_change() {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    let company = store.upsert_company("320193", "Apple Inc.", Some("AAPL")).await.unwrap();

    let prior = Filing::new(
        company.id,
        "320193",
        "0000320193-22-000050",
        "10-K",
        Utc::now() - chrono::Duration::days(365),
        "https://example.test/prior",
        FIRST_10K,
    );
    let prior = store.upsert_filing_draft(&prior).await.unwrap();
    let prior_sections = extract_sections(prior.id, FIRST_10K, "10-K");
    store.persist_ingestion_result(prior.id, &prior_sections, &[]).await.unwrap();

    let current = Filing::new(
        company.id,
        "320193",
        "0000320193-23-000064",
        "10-K",
        Utc::now(),
        "https://example.test/current",
        SECOND_10K_MATERIAL,
    );
    let current = store.upsert_filing_draft(&current).await.unwrap();

    let comparable = store
        .find_latest_comparable_filing(company.id, &["10-K"], current.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(comparable.id, prior.id);

    let comparison = compare_filings(
        current.id,
        comparable.id,
        Some(&comparable.raw_content),
        SECOND_10K_MATERIAL,
        "10-K",
    );
    let sections = extract_sections(current.id, SECOND_10K_MATERIAL, "10-K");
    let diffs: Vec<_> = comparison.section_diffs.iter().map(|sd| sd.diff.clone()).collect();
    assert!(comparison.material_changes > 0, "litigation/restatement language should score material");

    store.persist_ingestion_result(current.id, &sections, &diffs).await.unwrap();
    let processed = store.get_filing(current.id).await.unwrap();
    assert!(processed.material_changes > 0);

    let material = store.material_diffs_for_filing(current.id).await.unwrap();
    assert!(!material.is_empty());
    assert!(material.iter().all(|d| d.is_material()));
}

/// S3: two independent enqueues of logically-the-same work (e.g. a retried
/// POLL and the poller's own tick) collapse into one PENDING job instead of
/// creating a duplicate, as long as the first hasn't reached a terminal state.
#[tokio::test]
async fn s3_dedup_key_collapses_concurrent_enqueues() {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    let params = JobParameters::Poll { cik: "0000320193".into() };

    let job_a = filing_watch_engine::models::Job::new(params.clone(), JobPriority::Low)
        .with_dedup_key("poll:0000320193:100");
    let job_b = filing_watch_engine::models::Job::new(params, JobPriority::Low)
        .with_dedup_key("poll:0000320193:100");

    let id_a = store.enqueue(job_a).await.unwrap();
    let id_b = store.enqueue(job_b).await.unwrap();
    assert_eq!(id_a, id_b, "same dedup key while still pending must not create a second job");

    let pulled = store.pull_next().await.unwrap().unwrap();
    assert_eq!(pulled.id, id_a);
    assert_eq!(pulled.status, JobStatus::Running);

    store.complete(pulled.id, None).await.unwrap();

    // Once the first job is terminal, the same dedup key is free to reuse.
    let params2 = JobParameters::Poll { cik: "0000320193".into() };
    let job_c = filing_watch_engine::models::Job::new(params2, JobPriority::Low)
        .with_dedup_key("poll:0000320193:100");
    let id_c = store.enqueue(job_c).await.unwrap();
    assert_ne!(id_c, id_a, "a new job is created once the prior one is terminal");
}

/// S4: when the first provider in the chain fails, the Price Adapter moves
/// to the next one in order and reports the quote as `fallback_used`.
#[tokio::test]
async fn s4_price_adapter_fails_over_to_next_provider_in_order() {
    let adapter = PriceAdapter::new(
        vec![
            Box::new(StubProvider { name: "alpha", fail: true }),
            Box::new(StubProvider { name: "finnhub", fail: true }),
            Box::new(StubProvider { name: "yahoo", fail: false }),
        ],
        Arc::new(RateLimiter::new()),
        Arc::new(InMemoryQuoteCache::default()),
        100,
        Duration::from_secs(1),
        Duration::from_secs(60),
        tokio_util::sync::CancellationToken::new(),
    );

    let quote = adapter.get_quote("MSFT", GetQuoteOptions::default()).await.unwrap();
    assert_eq!(quote.provider, "yahoo", "should have skipped both failing providers in order");
    assert!(quote.fallback_used);
    assert_eq!(quote.provider_chain.len(), 2, "alpha and finnhub should both be recorded as failed attempts");
    assert!(quote.provider_chain.iter().all(|a| !a.success));
    assert!(
        quote.primary_error.as_deref().unwrap_or_default().contains("alpha"),
        "primary_error should mention alpha, the first provider to fail, got {:?}",
        quote.primary_error
    );
}

/// S6: the rate limiter never lets more than `limit` admissions land inside
/// any trailing `window`, even across many buckets used concurrently the way
/// the Price Adapter uses one bucket per provider.
#[tokio::test]
async fn s6_rate_limiter_bounds_admissions_per_window() {
    let limiter = RateLimiter::new();
    let cancel = tokio_util::sync::CancellationToken::new();
    let window = Duration::from_millis(150);
    let limit = 4u32;

    let start = std::time::Instant::now();
    for _ in 0..(limit * 2) {
        limiter.acquire("quote:alpha", limit, window, &cancel).await.unwrap();
        assert!(limiter.current_load("quote:alpha", window) <= limit as usize);
    }
    // Admitting twice the limit must have forced at least one window's wait.
    assert!(start.elapsed() >= window);
}
