//! Binance public API client for market data (no authentication required)

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{KlineRequest, MarketDataSource};
use crate::types::Kline;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl RawKline {
    fn into_kline(self) -> Option<Kline> {
        Some(Kline {
            open_time: self.0,
            open: Decimal::from_str(&self.1).ok()?,
            high: Decimal::from_str(&self.2).ok()?,
            low: Decimal::from_str(&self.3).ok()?,
            close: Decimal::from_str(&self.4).ok()?,
            volume: Decimal::from_str(&self.5).ok()?,
            close_time: self.6,
        })
    }
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Client against another endpoint (mirrors, testnet)
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch klines (candlestick data) for a symbol
    pub async fn get_klines(&self, request: &KlineRequest) -> Result<Vec<Kline>> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, request.symbol, request.interval
        );

        if let Some(start) = request.start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = request.end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = request.limit.min(MAX_KLINES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        debug!(symbol = %request.symbol, interval = %request.interval, "Fetching klines from Binance");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        let raw_klines: Vec<RawKline> = response.json().await?;
        let klines: Vec<Kline> = raw_klines
            .into_iter()
            .filter_map(RawKline::into_kline)
            .collect();

        debug!(count = klines.len(), "Fetched klines");
        Ok(klines)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Kline>> {
        self.get_klines(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_raw_kline_parsing() {
        let body = r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100",
            "148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397",
            "28.46694368","17928899.62484339"]]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let kline = raw.into_iter().next().unwrap().into_kline().unwrap();
        assert_eq!(kline.open_time, 1499040000000);
        assert_eq!(kline.close, dec!(0.01577100));
        assert_eq!(kline.close_time, 1499644799999);
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = BinanceClient::with_base_url("http://localhost:9000/").unwrap();
        assert_eq!(client.base_url, "http://localhost:9000");
    }
}
