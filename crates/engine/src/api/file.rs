//! Local JSON price files

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{KlineRequest, MarketDataSource};
use crate::types::{klines_from_closes, Kline};

/// Either full klines or a bare array of closes
#[derive(Deserialize)]
#[serde(untagged)]
enum PriceFile {
    Klines(Vec<Kline>),
    Closes(Vec<Decimal>),
}

/// Parse a price file body
pub fn parse_price_json(body: &str) -> Result<Vec<Kline>> {
    let parsed: PriceFile =
        serde_json::from_str(body).context("expected an array of klines or of close prices")?;
    Ok(match parsed {
        PriceFile::Klines(klines) => klines,
        PriceFile::Closes(closes) => klines_from_closes(&closes),
    })
}

/// Reads bars from a JSON file; the request's symbol and interval are not checked,
/// only the trailing `limit` bars are returned.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self) -> Result<Vec<Kline>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        parse_price_json(&body).with_context(|| format!("parsing {}", self.path.display()))
    }
}

#[async_trait]
impl MarketDataSource for JsonFileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Kline>> {
        let mut klines = self.load().await?;
        let limit = request.limit as usize;
        if limit > 0 && klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }
}
