// =============================================================================
// price/cache.rs — THE QUOTE CACHE
// =============================================================================
//
// `QuoteCache` is a trait seam so the default in-process `DashMap` cache can
// be swapped for a Redis-backed one in a multi-node deployment without
// touching `PriceAdapter`. TTL is checked on read, not enforced by eviction,
// so a stale entry is still available to `allowStale` callers.
// =============================================================================

use super::Quote;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CachedQuote {
    pub quote: Quote,
    fetched_at: Instant,
}

impl CachedQuote {
    pub fn new(quote: Quote) -> Self {
        Self { quote, fetched_at: Instant::now() }
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

#[async_trait]
pub trait QuoteCache: Send + Sync {
    async fn get(&self, symbol: &str) -> Option<CachedQuote>;
    async fn set(&self, symbol: &str, quote: CachedQuote);
}

/// Default single-process cache. Good enough for one `filing_watch_engine`
/// instance; a Redis-backed `QuoteCache` impl is a straightforward drop-in
/// for a fleet that needs to share quotes across nodes.
#[derive(Default)]
pub struct InMemoryQuoteCache {
    entries: DashMap<String, CachedQuote>,
}

#[async_trait]
impl QuoteCache for InMemoryQuoteCache {
    async fn get(&self, symbol: &str) -> Option<CachedQuote> {
        self.entries.get(symbol).map(|e| e.clone())
    }

    async fn set(&self, symbol: &str, quote: CachedQuote) {
        self.entries.insert(symbol.to_string(), quote);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::{Period, Quote};
    use chrono::Utc;

    fn dummy_quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            current: 100.0,
            open: 99.0,
            high: 101.0,
            low: 98.0,
            previous_close: 99.0,
            change: 1.0,
            change_percent: 1.01,
            volume: 100,
            market_cap: None,
            last_updated: Utc::now(),
            sparkline: vec![99.0; Period::OneMonth.sparkline_len()],
            provider: "alpha".into(),
            fallback_used: false,
            primary_error: None,
            stale: false,
            stale_age: None,
            provider_chain: Vec::new(),
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryQuoteCache::default();
        cache.set("AAPL", CachedQuote::new(dummy_quote("AAPL"))).await;
        let found = cache.get("AAPL").await.unwrap();
        assert_eq!(found.quote.symbol, "AAPL");
        assert!(found.age() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = InMemoryQuoteCache::default();
        assert!(cache.get("MSFT").await.is_none());
    }
}
