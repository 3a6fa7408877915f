//! Saving backtest runs to the run history

use persistence::repository::{BacktestRunRecord, BacktestRunRepository};
use persistence::SqlitePool;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::engine::BacktestEngine;
use crate::error::{EngineError, EngineResult};
use crate::strategy::{build_strategy, StrategyKind};
use crate::types::{BacktestConfig, BacktestResult, Kline};

/// Deterministic hash of everything that determines a run's outcome,
/// including every bar's OHLCV
pub fn compute_run_hash(
    strategy: &StrategyKind,
    config: &BacktestConfig,
    symbol: &str,
    klines: &[Kline],
) -> String {
    let strategy_json = serde_json::to_string(strategy).unwrap_or_default();
    let config_json = serde_json::to_string(config).unwrap_or_default();
    let header = format!(
        "{}:{}:{}:{}",
        strategy_json,
        config_json,
        symbol,
        klines.len()
    );

    let mut hasher = Sha256::new();
    hasher.update(header.as_bytes());
    for k in klines {
        let bar = format!(
            "|{}:{}:{}:{}:{}:{}:{}",
            k.open_time, k.open, k.high, k.low, k.close, k.volume, k.close_time
        );
        hasher.update(bar.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Convert a finished run into a history record
pub fn result_to_record(
    strategy: &StrategyKind,
    config: &BacktestConfig,
    symbol: &str,
    klines: &[Kline],
    result: &BacktestResult,
) -> BacktestRunRecord {
    BacktestRunRecord {
        id: None,
        run_hash: compute_run_hash(strategy, config, symbol, klines),
        strategy_name: strategy.name().to_string(),
        strategy_params: serde_json::to_string(strategy).unwrap_or_default(),
        symbol: symbol.to_string(),
        bars: klines.len() as i64,
        warmup: config.warmup as i64,
        initial_capital: result.initial_capital.to_string(),
        final_capital: result.final_capital.to_string(),
        total_trades: result.metrics.total_trades as i64,
        win_rate: finite(result.metrics.win_rate),
        profit_factor: result.metrics.profit_factor.to_string(),
        max_drawdown_pct: finite(result.metrics.max_drawdown_pct),
        sharpe_ratio: finite(result.metrics.sharpe_ratio),
        trades_json: serde_json::to_string(&result.trades).unwrap_or_else(|_| "[]".to_string()),
        created_at: None,
    }
}

/// Build the strategy, run it, and optionally record the run.
/// Returns the result and whether a new history row was written.
pub async fn run_backtest(
    strategy: &StrategyKind,
    config: &BacktestConfig,
    symbol: &str,
    klines: &[Kline],
    history: Option<&SqlitePool>,
) -> EngineResult<(BacktestResult, bool)> {
    let built = build_strategy(strategy)
        .map_err(|e| EngineError::InvalidConfig(format!("{:#}", e)))?;
    let mut engine = BacktestEngine::new(built, config.clone());
    let result = engine.run(klines).await?;

    let mut saved = false;
    if let Some(pool) = history {
        let record = result_to_record(strategy, config, symbol, klines, &result);
        saved = BacktestRunRepository::new(pool).save(&record).await?;
        info!(run_hash = %record.run_hash, saved, "Backtest run recorded");
    }

    Ok((result, saved))
}
