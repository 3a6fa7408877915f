//! Types for the backtesting engine

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Kline {
    /// A close-only bar: open, high and low collapse onto the close.
    pub fn from_close(index: usize, close: Decimal) -> Self {
        let open_time = index as i64;
        Self {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
            close_time: open_time,
        }
    }
}

/// Lift a close-only price series into klines indexed 0..n
pub fn klines_from_closes(closes: &[Decimal]) -> Vec<Kline> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Kline::from_close(i, c))
        .collect()
}

/// Close prices as f64, for the statistics functions
pub fn closes_f64(klines: &[Kline]) -> Vec<f64> {
    klines
        .iter()
        .map(|k| k.close.to_f64().unwrap_or(f64::NAN))
        .collect()
}

/// Direction of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// +1 for long, -1 for short
    pub fn sign(self) -> Decimal {
        match self {
            TradeSide::Long => Decimal::ONE,
            TradeSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// A trade proposed by a strategy for the current bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSetup {
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub strategy: String,
}

/// How the realized exit price of a setup is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Longs exit at the stop loss, shorts at the take profit
    #[default]
    LongStopShortTarget,
    /// Every trade exits at its take profit
    TakeProfit,
    /// Every trade exits at its stop loss
    StopLoss,
}

impl ExitPolicy {
    pub fn exit_price(self, setup: &TradeSetup) -> Decimal {
        match self {
            ExitPolicy::LongStopShortTarget => match setup.side {
                TradeSide::Long => setup.stop_loss,
                TradeSide::Short => setup.take_profit,
            },
            ExitPolicy::TakeProfit => setup.take_profit,
            ExitPolicy::StopLoss => setup.stop_loss,
        }
    }
}

/// Realized outcome of a setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub strategy: String,
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_size: Decimal,
    pub pnl: Decimal,
    /// Index of the trigger bar in the full input series (warmup included)
    pub bar_index: usize,
    /// `open_time` of the trigger bar
    pub timestamp: i64,
    /// Running capital after this trade was applied
    pub capital_after: Decimal,
}

/// Configuration for a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    /// Fraction of current capital risked per trade (0.02 = 2%)
    pub risk_per_trade: Decimal,
    /// Leading bars handed to `Strategy::train` and excluded from trading
    pub warmup: usize,
    pub exit_policy: ExitPolicy,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(10000),
            risk_per_trade: Decimal::new(2, 2),
            warmup: 0,
            exit_policy: ExitPolicy::default(),
        }
    }
}

/// A point on the capital curve, one per closed trade plus the starting point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: i64,
    pub equity: Decimal,
}

/// Aggregate statistics over a backtest's trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Percentage, 0–100
    pub win_rate: f64,
    /// Gross profit / max(gross loss, 1)
    pub profit_factor: Decimal,
    /// Percentage of peak capital, 0–100
    pub max_drawdown_pct: f64,
    /// Mean / population stdev of per-trade returns, unannualized. NaN with fewer than
    /// two distinct returns.
    pub sharpe_ratio: f64,
    pub total_pnl: Decimal,
    pub roi: f64,
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    pub trades: Vec<TradeResult>,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn setup(side: TradeSide) -> TradeSetup {
        TradeSetup {
            side,
            entry_price: dec!(100),
            stop_loss: dec!(95),
            take_profit: dec!(110),
            strategy: "test".to_string(),
        }
    }

    #[test]
    fn test_exit_policy_literal() {
        let policy = ExitPolicy::LongStopShortTarget;
        assert_eq!(policy.exit_price(&setup(TradeSide::Long)), dec!(95));
        assert_eq!(policy.exit_price(&setup(TradeSide::Short)), dec!(110));
    }

    #[test]
    fn test_exit_policy_fixed_sides() {
        assert_eq!(ExitPolicy::TakeProfit.exit_price(&setup(TradeSide::Long)), dec!(110));
        assert_eq!(ExitPolicy::StopLoss.exit_price(&setup(TradeSide::Short)), dec!(95));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: BacktestConfig = serde_json::from_str(r#"{"warmup": 20}"#).unwrap();
        assert_eq!(config.warmup, 20);
        assert_eq!(config.initial_capital, dec!(10000));
        assert_eq!(config.exit_policy, ExitPolicy::LongStopShortTarget);
    }

    #[test]
    fn test_klines_from_closes() {
        let klines = klines_from_closes(&[dec!(1), dec!(2)]);
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].open_time, 1);
        assert_eq!(klines[1].high, dec!(2));
        assert_eq!(closes_f64(&klines), vec![1.0, 2.0]);
    }
}
