//! Strategy interface consumed by the backtest engine

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::indicators::{RsiReversionStrategy, SmaCrossStrategy, VolatilityBreakoutStrategy};
use crate::types::{Kline, TradeSetup};

/// A pluggable trading strategy.
///
/// `train` is optional: the default does nothing. `analyze` receives every test
/// bar strictly before the bar being traded and may return any number of setups.
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Calibrate on the warmup bars. Called once before any bar is analyzed.
    async fn train(&mut self, _warmup: &[Kline]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Propose setups for the next bar. `history` holds the test bars before it,
    /// so the first test bar sees an empty slice and entries price off the
    /// previous close.
    async fn analyze(&mut self, history: &[Kline]) -> anyhow::Result<Vec<TradeSetup>>;
}

/// Built-in strategies with their parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    SmaCross {
        fast: usize,
        slow: usize,
        /// Stop distance as a fraction of entry (0.02 = 2%)
        stop_pct: f64,
        target_pct: f64,
    },
    RsiReversion {
        period: usize,
        oversold: f64,
        overbought: f64,
        stop_pct: f64,
        target_pct: f64,
    },
    VolatilityBreakout {
        atr_period: usize,
        /// Breakout threshold in multiples of the trained ATR
        multiplier: f64,
        /// Target distance in multiples of the stop distance
        reward_ratio: f64,
    },
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::SmaCross { .. } => "sma_cross",
            StrategyKind::RsiReversion { .. } => "rsi_reversion",
            StrategyKind::VolatilityBreakout { .. } => "volatility_breakout",
        }
    }

    /// Default parameters for a strategy name, as accepted on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sma_cross" | "sma" => Some(StrategyKind::SmaCross {
                fast: 10,
                slow: 30,
                stop_pct: 0.02,
                target_pct: 0.04,
            }),
            "rsi_reversion" | "rsi" => Some(StrategyKind::RsiReversion {
                period: 14,
                oversold: 30.0,
                overbought: 70.0,
                stop_pct: 0.02,
                target_pct: 0.03,
            }),
            "volatility_breakout" | "breakout" => Some(StrategyKind::VolatilityBreakout {
                atr_period: 14,
                multiplier: 1.5,
                reward_ratio: 2.0,
            }),
            _ => None,
        }
    }
}

/// Instantiate a fresh strategy for one backtest run
pub fn build_strategy(kind: &StrategyKind) -> anyhow::Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match *kind {
        StrategyKind::SmaCross {
            fast,
            slow,
            stop_pct,
            target_pct,
        } => Box::new(SmaCrossStrategy::new(fast, slow, stop_pct, target_pct)?),
        StrategyKind::RsiReversion {
            period,
            oversold,
            overbought,
            stop_pct,
            target_pct,
        } => Box::new(RsiReversionStrategy::new(
            period, oversold, overbought, stop_pct, target_pct,
        )?),
        StrategyKind::VolatilityBreakout {
            atr_period,
            multiplier,
            reward_ratio,
        } => Box::new(VolatilityBreakoutStrategy::new(
            atr_period,
            multiplier,
            reward_ratio,
        )?),
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_aliases() {
        assert_eq!(StrategyKind::from_name("sma"), StrategyKind::from_name("sma_cross"));
        assert!(StrategyKind::from_name("unknown").is_none());
    }

    #[test]
    fn test_kind_serde_tagged() {
        let kind: StrategyKind = serde_json::from_str(
            r#"{"type":"volatility_breakout","atr_period":10,"multiplier":2.0,"reward_ratio":1.5}"#,
        )
        .unwrap();
        assert_eq!(kind.name(), "volatility_breakout");
    }

    #[test]
    fn test_build_rejects_bad_params() {
        let kind = StrategyKind::SmaCross {
            fast: 30,
            slow: 10,
            stop_pct: 0.02,
            target_pct: 0.04,
        };
        assert!(build_strategy(&kind).is_err());
    }

    #[test]
    fn test_build_all_defaults() {
        for name in ["sma_cross", "rsi_reversion", "volatility_breakout"] {
            let kind = StrategyKind::from_name(name).unwrap();
            let strategy = build_strategy(&kind).unwrap();
            assert_eq!(strategy.name(), name);
        }
    }
}
