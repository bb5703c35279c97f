// Yahoo Finance's unauthenticated chart endpoint. Needs no API key, so it's
// a reasonable third link in the fallback chain.

use super::QuoteProvider;
use crate::error::{CoreError, CoreResult};
use crate::price::{Period, RawQuote};
use async_trait::async_trait;
use serde::Deserialize;

pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    fn range_for(period: Period) -> &'static str {
        match period {
            Period::IntraDay => "1d",
            Period::OneWeek => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::OneYear => "1y",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: f64,
    #[serde(rename = "previousClose", default)]
    previous_close: Option<f64>,
    #[serde(rename = "chartPreviousClose", default)]
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Deserialize, Default)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d",
            self.base_url,
            symbol,
            Self::range_for(period)
        );
        let resp = self.client.get(&url).send().await.map_err(CoreError::from)?;
        let body: ChartResponse = resp.json().await.map_err(CoreError::from)?;
        let result = body
            .chart
            .result
            .and_then(|mut r| r.pop())
            .ok_or_else(|| CoreError::NotFound(format!("yahoo: no chart result for {symbol}")))?;

        let series = result.indicators.quote.into_iter().next().unwrap_or_default();
        let closes: Vec<f64> = series.close.into_iter().flatten().collect();
        let previous_close = result
            .meta
            .previous_close
            .or(result.meta.chart_previous_close)
            .or_else(|| closes.first().copied())
            .unwrap_or(result.meta.regular_market_price);

        Ok(RawQuote {
            symbol: symbol.to_string(),
            current: result.meta.regular_market_price,
            open: series.open.into_iter().flatten().last().unwrap_or(result.meta.regular_market_price),
            high: series.high.into_iter().flatten().fold(f64::MIN, f64::max).max(result.meta.regular_market_price),
            low: series.low.into_iter().flatten().fold(f64::MAX, f64::min).min(result.meta.regular_market_price),
            previous_close,
            volume: series.volume.into_iter().flatten().last().unwrap_or(0),
            market_cap: None,
            sparkline: closes,
        })
    }
}
