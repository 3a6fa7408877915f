//! Backtest runs repository: history of saved backtests

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A saved backtest run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: Option<i64>,
    pub run_hash: String,
    pub strategy_name: String,
    pub strategy_params: String,
    pub symbol: String,
    pub bars: i64,
    pub warmup: i64,
    pub initial_capital: String,
    pub final_capital: String,
    pub total_trades: i64,
    pub win_rate: Option<f64>,
    pub profit_factor: String,
    pub max_drawdown_pct: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub trades_json: String,
    pub created_at: Option<i64>,
}

/// Repository for saved backtest runs
pub struct BacktestRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Save a run with INSERT OR IGNORE, so an identical run_hash is kept once.
    /// Returns true when a new row was written.
    pub async fn save(&self, record: &BacktestRunRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO backtest_runs (
                run_hash, strategy_name, strategy_params, symbol, bars, warmup,
                initial_capital, final_capital, total_trades, win_rate,
                profit_factor, max_drawdown_pct, sharpe_ratio, trades_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.run_hash)
        .bind(&record.strategy_name)
        .bind(&record.strategy_params)
        .bind(&record.symbol)
        .bind(record.bars)
        .bind(record.warmup)
        .bind(&record.initial_capital)
        .bind(&record.final_capital)
        .bind(record.total_trades)
        .bind(record.win_rate.filter(|v| v.is_finite()))
        .bind(&record.profit_factor)
        .bind(record.max_drawdown_pct.filter(|v| v.is_finite()))
        .bind(record.sharpe_ratio.filter(|v| v.is_finite()))
        .bind(&record.trades_json)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent runs first
    pub async fn get_recent(&self, limit: i64) -> DbResult<Vec<BacktestRunRecord>> {
        let records = sqlx::query_as::<_, BacktestRunRecord>(
            "SELECT * FROM backtest_runs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_hash(&self, run_hash: &str) -> DbResult<Option<BacktestRunRecord>> {
        let record =
            sqlx::query_as::<_, BacktestRunRecord>("SELECT * FROM backtest_runs WHERE run_hash = ?")
                .bind(run_hash)
                .fetch_optional(self.pool)
                .await?;

        Ok(record)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM backtest_runs")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}
