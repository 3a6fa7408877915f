//! Database schema definitions

/// SQL to create all tables
/// NOTE: capital and pnl amounts stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Per-model financial metrics, one row per metric per analysis
CREATE TABLE IF NOT EXISTS model_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    value REAL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Saved backtest runs
CREATE TABLE IF NOT EXISTS backtest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_hash TEXT NOT NULL UNIQUE,
    strategy_name TEXT NOT NULL,
    strategy_params TEXT NOT NULL,
    symbol TEXT NOT NULL,
    bars INTEGER NOT NULL,
    warmup INTEGER NOT NULL,
    initial_capital TEXT NOT NULL,
    final_capital TEXT NOT NULL,
    total_trades INTEGER NOT NULL DEFAULT 0,
    win_rate REAL,
    profit_factor TEXT NOT NULL DEFAULT '0',
    max_drawdown_pct REAL,
    sharpe_ratio REAL,
    trades_json TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_model_metrics_model ON model_metrics(model_id, metric_type);
CREATE INDEX IF NOT EXISTS idx_backtest_runs_strategy ON backtest_runs(strategy_name, symbol);
CREATE INDEX IF NOT EXISTS idx_backtest_runs_created ON backtest_runs(created_at DESC)
"#;
