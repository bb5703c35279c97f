// IEX Cloud /stock/{symbol}/quote endpoint. Last link in the chain: a paid
// API with a generous free tier, used only once the three above have failed.

use super::QuoteProvider;
use crate::error::{CoreError, CoreResult};
use crate::price::{Period, RawQuote};
use async_trait::async_trait;
use serde::Deserialize;

pub struct IexProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl IexProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { client, api_key: api_key.into(), base_url: base_url.into() }
    }
}

#[derive(Debug, Deserialize)]
struct IexQuote {
    #[serde(rename = "latestPrice")]
    latest_price: f64,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    #[serde(rename = "previousClose")]
    previous_close: f64,
    #[serde(rename = "latestVolume", default)]
    latest_volume: Option<u64>,
    #[serde(rename = "marketCap", default)]
    market_cap: Option<f64>,
}

#[async_trait]
impl QuoteProvider for IexProvider {
    fn name(&self) -> &'static str {
        "iex"
    }

    async fn fetch(&self, symbol: &str, _period: Period) -> CoreResult<RawQuote> {
        let url = format!(
            "{}/stock/{}/quote?token={}",
            self.base_url, symbol, self.api_key
        );
        let resp = self.client.get(&url).send().await.map_err(CoreError::from)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("iex: no data for {symbol}")));
        }
        let q: IexQuote = resp.json().await.map_err(CoreError::from)?;

        Ok(RawQuote {
            symbol: symbol.to_string(),
            current: q.latest_price,
            open: q.open.unwrap_or(q.latest_price),
            high: q.high.unwrap_or(q.latest_price),
            low: q.low.unwrap_or(q.latest_price),
            previous_close: q.previous_close,
            volume: q.latest_volume.unwrap_or(0),
            market_cap: q.market_cap,
            sparkline: vec![q.latest_price],
        })
    }
}
