// =============================================================================
// price/providers/mod.rs — THE PROVIDER SEAM
// =============================================================================

pub mod alpha;
pub mod finnhub;
pub mod iex;
pub mod yahoo;

use crate::error::CoreResult;
use crate::price::{Period, RawQuote};
use async_trait::async_trait;

/// A single quote source. Every provider normalizes its own wire format into
/// `RawQuote`; `PriceAdapter` handles validation, caching, and fallback.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote>;
}

pub(crate) fn sparkline_days(period: Period) -> usize {
    match period {
        Period::IntraDay => 78,
        Period::OneWeek => 7,
        Period::OneMonth => 30,
        Period::ThreeMonths => 90,
        Period::OneYear => 365,
    }
}
