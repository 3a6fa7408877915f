//! Market data sources
//!
//! A [`FallbackMarketData`] chain asks each source in priority order and
//! returns the first non-empty answer.

pub mod binance;
pub mod file;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::Kline;

pub use binance::BinanceClient;
pub use file::JsonFileSource;

/// What to fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineRequest {
    pub symbol: String,
    pub interval: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: u32,
}

impl KlineRequest {
    pub fn new(symbol: &str, interval: &str, limit: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            start_time: None,
            end_time: None,
            limit,
        }
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Kline>>;
}

/// Ordered list of sources, highest priority first
#[derive(Default)]
pub struct FallbackMarketData {
    sources: Vec<Box<dyn MarketDataSource>>,
}

impl FallbackMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Box<dyn MarketDataSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// First non-empty result. Fails listing every source's error when none answers.
    pub async fn fetch_klines(&self, request: &KlineRequest) -> Result<(String, Vec<Kline>)> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.fetch_klines(request).await {
                Ok(klines) if !klines.is_empty() => {
                    info!(
                        source = source.name(),
                        symbol = %request.symbol,
                        bars = klines.len(),
                        "Market data loaded"
                    );
                    return Ok((source.name().to_string(), klines));
                }
                Ok(_) => {
                    warn!(source = source.name(), symbol = %request.symbol, "Source returned no data");
                    failures.push(format!("{}: no data", source.name()));
                }
                Err(e) => {
                    warn!(source = source.name(), symbol = %request.symbol, error = %e, "Source failed");
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        if failures.is_empty() {
            anyhow::bail!("No market data sources configured");
        }
        anyhow::bail!(
            "All market data sources failed for {}: {}",
            request.symbol,
            failures.join("; ")
        )
    }
}
