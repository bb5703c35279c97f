// Alpha Vantage GLOBAL_QUOTE endpoint.

use super::{sparkline_days, QuoteProvider};
use crate::error::{CoreError, CoreResult};
use crate::price::{Period, RawQuote};
use async_trait::async_trait;
use serde::Deserialize;

pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { client, api_key: api_key.into(), base_url: base_url.into() }
    }
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: String,
    #[serde(rename = "02. open")]
    open: String,
    #[serde(rename = "03. high")]
    high: String,
    #[serde(rename = "04. low")]
    low: String,
    #[serde(rename = "08. previous close")]
    previous_close: String,
    #[serde(rename = "06. volume")]
    volume: String,
}

#[async_trait]
impl QuoteProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        "alpha"
    }

    async fn fetch(&self, symbol: &str, period: Period) -> CoreResult<RawQuote> {
        let url = format!(
            "{}/query?function=GLOBAL_QUOTE&symbol={}&apikey={}",
            self.base_url, symbol, self.api_key
        );
        let resp = self.client.get(&url).send().await.map_err(CoreError::from)?;
        let body: GlobalQuoteResponse = resp.json().await.map_err(CoreError::from)?;
        let q = body
            .global_quote
            .ok_or_else(|| CoreError::ProviderMalformed(format!("alpha: no quote for {symbol}")))?;

        let parse = |s: &str| -> CoreResult<f64> {
            s.parse().map_err(|_| CoreError::ProviderMalformed(format!("alpha: bad number {s}")))
        };

        Ok(RawQuote {
            symbol: symbol.to_string(),
            current: parse(&q.price)?,
            open: parse(&q.open)?,
            high: parse(&q.high)?,
            low: parse(&q.low)?,
            previous_close: parse(&q.previous_close)?,
            volume: q.volume.parse().unwrap_or(0),
            market_cap: None,
            // Alpha Vantage's free tier doesn't return a series from GLOBAL_QUOTE;
            // a flat sparkline at the current price is the best this endpoint offers.
            sparkline: vec![parse(&q.price)?; sparkline_days(period).min(1)],
        })
    }
}
