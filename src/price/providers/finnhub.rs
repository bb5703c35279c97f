// Finnhub /quote endpoint.

use super::QuoteProvider;
use crate::error::{CoreError, CoreResult};
use crate::price::{Period, RawQuote};
use async_trait::async_trait;
use serde::Deserialize;

pub struct FinnhubProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FinnhubProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { client, api_key: api_key.into(), base_url: base_url.into() }
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    c: f64, // current
    o: f64, // open
    h: f64, // high
    l: f64, // low
    pc: f64, // previous close
    #[serde(default)]
    v: Option<u64>,
}

#[async_trait]
impl QuoteProvider for FinnhubProvider {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn fetch(&self, symbol: &str, _period: Period) -> CoreResult<RawQuote> {
        let url = format!("{}/quote?symbol={}&token={}", self.base_url, symbol, self.api_key);
        let resp = self.client.get(&url).send().await.map_err(CoreError::from)?;
        let q: FinnhubQuote = resp.json().await.map_err(CoreError::from)?;

        if q.c == 0.0 && q.pc == 0.0 {
            return Err(CoreError::NotFound(format!("finnhub: no data for {symbol}")));
        }

        Ok(RawQuote {
            symbol: symbol.to_string(),
            current: q.c,
            open: q.o,
            high: q.h,
            low: q.l,
            previous_close: q.pc,
            volume: q.v.unwrap_or(0),
            market_cap: None,
            sparkline: vec![q.c],
        })
    }
}
