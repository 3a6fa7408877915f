//! tradelab engine — backtesting and financial metrics
//!
//! Provides:
//! - Risk/return statistics (Sharpe, Sortino, max drawdown, ROI)
//! - Bar-by-bar backtest engine over pluggable async strategies
//! - Financial modeling service with confidence score and recommendation
//! - Trade audit rules
//! - Market data sources with priority fallback

pub mod api;
pub mod audit;
pub mod engine;
pub mod error;
pub mod history;
pub mod indicators;
pub mod metrics;
pub mod modeling;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use api::{BinanceClient, FallbackMarketData, JsonFileSource, KlineRequest, MarketDataSource};
pub use audit::{audit_trades, default_rules, AuditFinding, AuditRule, AuditRuleKind, Severity};
pub use engine::BacktestEngine;
pub use error::{EngineError, EngineResult};
pub use history::run_backtest;
pub use metrics::StatsMode;
pub use modeling::{
    FinancialAnalysis, FinancialModelingService, MemoryMetricsStore, MetricRow, MetricsStore,
    Recommendation, SqliteMetricsStore,
};
pub use strategy::{build_strategy, Strategy, StrategyKind};
pub use types::*;
