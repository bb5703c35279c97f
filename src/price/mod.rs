// =============================================================================
// price/mod.rs — THE PRICE ADAPTER
// =============================================================================
//
// getQuote() walks a fixed provider chain (alpha, finnhub, yahoo, iex),
// falling back to the next provider on any failure, the way
// `borsa_core::core::fetch_single_priority_with_fallback` walks connectors in
// priority order: try each, collect errors, return on first success, fail
// with the aggregate if every provider is exhausted. Each attempt is wrapped
// by a per-provider rate-limiter bucket (§4.B) and a timeout.
// =============================================================================

pub mod cache;
pub mod providers;

use crate::error::{CoreError, CoreResult};
use crate::rate_limiter::RateLimiter;
use cache::{CachedQuote, QuoteCache};
use chrono::{DateTime, Utc};
use providers::QuoteProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    IntraDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
    OneYear,
}

impl Period {
    pub fn sparkline_len(self) -> usize {
        match self {
            Period::IntraDay => 78, // ~5-minute bars over a 6.5h session
            Period::OneWeek => 7,
            Period::OneMonth => 30,
            Period::ThreeMonths => 90,
            Period::OneYear => 365,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetQuoteOptions {
    pub period: Option<Period>,
    pub force_provider: Option<String>,
    pub skip_cache: bool,
    pub allow_stale: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawQuote {
    pub symbol: String,
    pub current: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub volume: u64,
    pub market_cap: Option<f64>,
    pub sparkline: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub current: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub market_cap: Option<f64>,
    pub last_updated: DateTime<Utc>,
    pub sparkline: Vec<f64>,
    pub provider: String,
    pub fallback_used: bool,
    pub primary_error: Option<String>,
    pub stale: bool,
    pub stale_age: Option<Duration>,
    pub provider_chain: Vec<ProviderAttempt>,
}

fn normalize(raw: RawQuote, provider: &str) -> CoreResult<Quote> {
    if raw.current <= 0.0 {
        return Err(CoreError::ProviderMalformed(format!(
            "{provider}: non-positive current price {}",
            raw.current
        )));
    }
    let change = raw.current - raw.previous_close;
    let change_percent = if raw.previous_close != 0.0 {
        (change / raw.previous_close) * 100.0
    } else {
        0.0
    };
    if change_percent.abs() > 50.0 {
        return Err(CoreError::ProviderMalformed(format!(
            "{provider}: implausible changePercent {change_percent}"
        )));
    }

    Ok(Quote {
        symbol: raw.symbol,
        current: raw.current,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        previous_close: raw.previous_close,
        change,
        change_percent,
        volume: raw.volume,
        market_cap: raw.market_cap,
        last_updated: Utc::now(),
        sparkline: raw.sparkline,
        provider: provider.to_string(),
        fallback_used: false,
        primary_error: None,
        stale: false,
        stale_age: None,
        provider_chain: Vec::new(),
    })
}

pub struct PriceAdapter {
    providers: Vec<Box<dyn QuoteProvider>>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn QuoteCache>,
    per_provider_rate_limit: u32,
    provider_timeout: Duration,
    cache_ttl: Duration,
    shutdown: CancellationToken,
}

impl PriceAdapter {
    pub fn new(
        providers: Vec<Box<dyn QuoteProvider>>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn QuoteCache>,
        per_provider_rate_limit: u32,
        provider_timeout: Duration,
        cache_ttl: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            providers,
            limiter,
            cache,
            per_provider_rate_limit,
            provider_timeout,
            cache_ttl,
            shutdown,
        }
    }

    pub async fn get_quote(&self, symbol: &str, opts: GetQuoteOptions) -> CoreResult<Quote> {
        if !opts.skip_cache {
            if let Some(cached) = self.cache.get(symbol).await {
                if cached.age() < self.cache_ttl {
                    return Ok(cached.quote);
                }
            }
        }

        let chain: Vec<&Box<dyn QuoteProvider>> = match &opts.force_provider {
            Some(name) => self.providers.iter().filter(|p| p.name() == name).collect(),
            None => self.providers.iter().collect(),
        };

        let mut attempts = Vec::new();
        let period = opts.period.unwrap_or(Period::OneMonth);

        for (index, provider) in chain.iter().enumerate() {
            let bucket = format!("quote:{}", provider.name());
            self.limiter
                .acquire(&bucket, self.per_provider_rate_limit, Duration::from_secs(1), &self.shutdown)
                .await?;

            let fetch = provider.fetch(symbol, period);
            let result = tokio::time::timeout(self.provider_timeout, fetch).await;

            match result {
                Ok(Ok(raw)) => match normalize(raw, provider.name()) {
                    Ok(mut quote) => {
                        quote.fallback_used = index > 0;
                        quote.primary_error = attempts.first().and_then(|a| a.error.clone());
                        quote.provider_chain = attempts;
                        self.cache.set(symbol, CachedQuote::new(quote.clone())).await;
                        return Ok(quote);
                    }
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "quote normalization rejected response");
                        attempts.push(ProviderAttempt {
                            provider: provider.name().to_string(),
                            success: false,
                            error: Some(e.to_string()),
                        });
                    }
                },
                Ok(Err(e)) => {
                    attempts.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
                Err(_) => {
                    attempts.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        success: false,
                        error: Some("provider timed out".to_string()),
                    });
                }
            }
        }

        if opts.allow_stale {
            if let Some(cached) = self.cache.get(symbol).await {
                let mut quote = cached.quote;
                quote.stale = true;
                quote.stale_age = Some(cached.age());
                quote.provider_chain = attempts;
                return Ok(quote);
            }
        }

        Err(CoreError::AllProvidersUnavailable {
            attempted: attempts.into_iter().map(|a| a.provider).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::cache::InMemoryQuoteCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QuoteProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::TransientTransport(format!("{} is down", self.name)));
            }
            Ok(RawQuote {
                symbol: symbol.to_string(),
                current: 100.0,
                open: 98.0,
                high: 101.0,
                low: 97.0,
                previous_close: 99.0,
                volume: 1000,
                market_cap: None,
                sparkline: vec![99.0; period.sparkline_len().min(5)],
            })
        }
    }

    fn adapter(providers: Vec<Box<dyn QuoteProvider>>) -> PriceAdapter {
        PriceAdapter::new(
            providers,
            Arc::new(RateLimiter::new()),
            Arc::new(InMemoryQuoteCache::default()),
            100,
            Duration::from_secs(1),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Box::new(FlakyProvider { name: "alpha", fail: true, calls: calls.clone() });
        let second = Box::new(FlakyProvider { name: "finnhub", fail: false, calls: calls.clone() });
        let a = adapter(vec![first, second]);

        let quote = a.get_quote("AAPL", GetQuoteOptions::default()).await.unwrap();
        assert_eq!(quote.provider, "finnhub");
        assert!(quote.fallback_used);
        assert!(
            quote.primary_error.as_deref().unwrap_or_default().contains("alpha"),
            "primary_error should mention the first provider that failed, got {:?}",
            quote.primary_error
        );
    }

    #[tokio::test]
    async fn shutdown_cancellation_is_reported_distinctly_from_provider_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Box::new(FlakyProvider { name: "alpha", fail: false, calls: calls.clone() });
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let a = PriceAdapter::new(
            vec![first],
            Arc::new(RateLimiter::new()),
            Arc::new(InMemoryQuoteCache::default()),
            100,
            Duration::from_secs(1),
            Duration::from_secs(60),
            shutdown,
        );

        let result = a.get_quote("AAPL", GetQuoteOptions::default()).await;
        assert!(matches!(result, Err(CoreError::Cancelled(_))));
    }

    #[tokio::test]
    async fn all_providers_failing_without_cache_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Box::new(FlakyProvider { name: "alpha", fail: true, calls: calls.clone() });
        let a = adapter(vec![first]);

        let result = a.get_quote("AAPL", GetQuoteOptions::default()).await;
        assert!(matches!(result, Err(CoreError::AllProvidersUnavailable { .. })));
    }

    #[tokio::test]
    async fn stale_cache_served_when_all_providers_fail_and_stale_allowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Box::new(FlakyProvider { name: "alpha", fail: false, calls: calls.clone() });
        let a = adapter(vec![first]);

        a.get_quote("AAPL", GetQuoteOptions::default()).await.unwrap();

        let opts = GetQuoteOptions { skip_cache: true, allow_stale: true, ..Default::default() };
        let quote = a.get_quote("AAPL", opts).await.unwrap();
        assert!(quote.stale);
        assert!(quote.stale_age.is_some());
    }

    struct ToggleProvider {
        name: &'static str,
        fail: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl QuoteProvider for ToggleProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::TransientTransport(format!("{} is down", self.name)));
            }
            Ok(RawQuote {
                symbol: symbol.to_string(),
                current: 100.0,
                open: 98.0,
                high: 101.0,
                low: 97.0,
                previous_close: 99.0,
                volume: 1000,
                market_cap: None,
                sparkline: vec![99.0; period.sparkline_len().min(5)],
            })
        }
    }

    #[tokio::test]
    async fn all_providers_fail_without_stale_allowed_errors_even_with_cache() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let provider = Box::new(ToggleProvider { name: "alpha", fail: fail.clone() });
        let a = adapter(vec![provider]);
        a.get_quote("AAPL", GetQuoteOptions::default()).await.unwrap();

        fail.store(true, Ordering::SeqCst);
        let opts = GetQuoteOptions { skip_cache: true, allow_stale: false, ..Default::default() };
        let result = a.get_quote("AAPL", opts).await;
        assert!(matches!(result, Err(CoreError::AllProvidersUnavailable { .. })));
    }

    #[tokio::test]
    async fn cached_quote_served_without_hitting_providers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Box::new(FlakyProvider { name: "alpha", fail: false, calls: calls.clone() });
        let a = adapter(vec![first]);

        a.get_quote("AAPL", GetQuoteOptions::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        a.get_quote("AAPL", GetQuoteOptions::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second call should hit cache, not providers");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use super::providers::QuoteProvider;
    use cache::InMemoryQuoteCache;
    use async_trait::async_trait;
    use proptest::prelude::*;

    fn adapter(providers: Vec<Box<dyn QuoteProvider>>) -> PriceAdapter {
        PriceAdapter::new(
            providers,
            Arc::new(RateLimiter::new()),
            Arc::new(InMemoryQuoteCache::default()),
            100,
            Duration::from_secs(1),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    struct NamedToggle {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl QuoteProvider for NamedToggle {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
            if self.fail {
                return Err(CoreError::TransientTransport(format!("{} down", self.name)));
            }
            Ok(RawQuote {
                symbol: symbol.to_string(),
                current: 50.0,
                open: 49.0,
                high: 51.0,
                low: 48.0,
                previous_close: 49.5,
                volume: 10,
                market_cap: None,
                sparkline: vec![49.5; period.sparkline_len().min(3)],
            })
        }
    }

    proptest! {
        /// Invariant 9: whichever provider in the chain is the first to
        /// succeed is the one the returned quote is attributed to, and every
        /// provider ahead of it in the chain shows up as a failed attempt.
        #[test]
        fn quote_provider_matches_first_success_in_chain(failures in prop::collection::vec(any::<bool>(), 1..5)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let names = ["p0", "p1", "p2", "p3", "p4"];
                let first_success = failures.iter().position(|f| !f);
                let providers: Vec<Box<dyn QuoteProvider>> = failures
                    .iter()
                    .enumerate()
                    .map(|(i, &fail)| Box::new(NamedToggle { name: names[i], fail }) as Box<dyn QuoteProvider>)
                    .collect();
                let a = adapter(providers);
                let result = a.get_quote("TEST", GetQuoteOptions::default()).await;

                match first_success {
                    Some(idx) => {
                        let quote = result.expect("a non-failing provider exists");
                        assert_eq!(quote.provider, names[idx]);
                        assert_eq!(quote.fallback_used, idx > 0);
                        assert_eq!(quote.provider_chain.len(), idx);
                    }
                    None => {
                        assert!(result.is_err(), "every provider failed, so the adapter must error");
                    }
                }
            });
        }
    }
}
