//! Bar-by-bar backtesting engine

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::metrics::{self, StatsMode};
use crate::strategy::Strategy;
use crate::types::*;

/// Runs one strategy over one price series.
///
/// Bars are processed strictly in order: position sizing on bar `i` uses the
/// capital left by every trade before it.
pub struct BacktestEngine {
    strategy: Box<dyn Strategy>,
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(strategy: Box<dyn Strategy>, config: BacktestConfig) -> Self {
        Self { strategy, config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest over `klines`. Errors from the strategy are returned as-is.
    pub async fn run(&mut self, klines: &[Kline]) -> EngineResult<BacktestResult> {
        self.validate(klines.len())?;

        let warmup = self.config.warmup;
        let (warmup_data, test_data) = klines.split_at(warmup);

        info!(
            strategy = self.strategy.name(),
            bars = klines.len(),
            warmup,
            capital = %self.config.initial_capital,
            risk = %self.config.risk_per_trade,
            "Starting backtest"
        );

        self.strategy
            .train(warmup_data)
            .await
            .map_err(EngineError::Strategy)?;

        let mut capital = self.config.initial_capital;
        let mut trades: Vec<TradeResult> = Vec::new();
        let mut equity_curve = vec![EquityPoint {
            time: test_data.first().map(|k| k.open_time).unwrap_or(0),
            equity: capital,
        }];

        for (i, bar) in test_data.iter().enumerate() {
            let setups = self
                .strategy
                .analyze(&test_data[..i])
                .await
                .map_err(EngineError::Strategy)?;

            for setup in setups {
                let trade = self.settle(&setup, capital, warmup + i, bar)?;
                capital = trade.capital_after;

                debug!(
                    side = ?trade.side,
                    entry = %trade.entry_price,
                    exit = %trade.exit_price,
                    size = %trade.position_size,
                    pnl = %trade.pnl,
                    bar = trade.bar_index,
                    "Trade settled"
                );

                equity_curve.push(EquityPoint {
                    time: bar.open_time,
                    equity: capital,
                });
                trades.push(trade);
            }
        }

        let metrics = calculate_metrics(&trades, self.config.initial_capital, capital, &equity_curve);

        info!(
            total_trades = metrics.total_trades,
            win_rate = metrics.win_rate,
            total_pnl = %metrics.total_pnl,
            final_capital = %capital,
            "Backtest complete"
        );

        Ok(BacktestResult {
            strategy: self.strategy.name().to_string(),
            initial_capital: self.config.initial_capital,
            final_capital: capital,
            trades,
            metrics,
            equity_curve,
        })
    }

    fn validate(&self, bars: usize) -> EngineResult<()> {
        let config = &self.config;
        if config.initial_capital <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "initial capital must be positive, got {}",
                config.initial_capital
            )));
        }
        if config.risk_per_trade <= Decimal::ZERO || config.risk_per_trade > Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "risk per trade must be in (0, 1], got {}",
                config.risk_per_trade
            )));
        }
        if config.warmup > bars {
            return Err(EngineError::InvalidConfig(format!(
                "warmup of {} bars exceeds series length {}",
                config.warmup, bars
            )));
        }
        Ok(())
    }

    /// Size and close one setup against the current capital
    fn settle(
        &self,
        setup: &TradeSetup,
        capital: Decimal,
        bar_index: usize,
        bar: &Kline,
    ) -> EngineResult<TradeResult> {
        let overflow = || EngineError::Overflow {
            strategy: setup.strategy.clone(),
            bar_index,
        };

        let stop_distance = setup
            .entry_price
            .checked_sub(setup.stop_loss)
            .ok_or_else(overflow)?
            .abs();
        if stop_distance.is_zero() {
            return Err(EngineError::ZeroStopDistance {
                strategy: setup.strategy.clone(),
                entry: setup.entry_price,
            });
        }

        let position_size = capital
            .checked_mul(self.config.risk_per_trade)
            .and_then(|risked| risked.checked_div(stop_distance))
            .ok_or_else(overflow)?;
        let exit_price = self.config.exit_policy.exit_price(setup);
        let pnl = exit_price
            .checked_sub(setup.entry_price)
            .and_then(|moved| moved.checked_mul(position_size))
            .and_then(|gross| gross.checked_mul(setup.side.sign()))
            .ok_or_else(overflow)?;
        let capital_after = capital.checked_add(pnl).ok_or_else(overflow)?;

        Ok(TradeResult {
            strategy: setup.strategy.clone(),
            side: setup.side,
            entry_price: setup.entry_price,
            exit_price,
            stop_loss: setup.stop_loss,
            take_profit: setup.take_profit,
            position_size,
            pnl,
            bar_index,
            timestamp: bar.open_time,
            capital_after,
        })
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Aggregate statistics over the settled trades
pub fn calculate_metrics(
    trades: &[TradeResult],
    initial_capital: Decimal,
    final_capital: Decimal,
    equity_curve: &[EquityPoint],
) -> BacktestMetrics {
    let total_trades = trades.len() as u32;
    let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count() as u32;
    let losing_trades = trades.iter().filter(|t| t.pnl < Decimal::ZERO).count() as u32;

    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let gross_profits: Decimal = trades
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_losses: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| t.pnl.abs())
        .sum();
    let profit_factor = gross_profits / gross_losses.max(Decimal::ONE);

    let curve: Vec<f64> = equity_curve.iter().map(|p| to_f64(p.equity)).collect();
    let max_drawdown_pct = metrics::max_drawdown(&curve, StatsMode::Lenient).unwrap_or(0.0) * 100.0;

    // Per-trade return relative to the capital the trade was sized from
    let returns: Vec<f64> = trades
        .iter()
        .map(|t| {
            let before = t.capital_after - t.pnl;
            if before.is_zero() {
                f64::NAN
            } else {
                to_f64(t.pnl / before)
            }
        })
        .collect();
    let sharpe_ratio = metrics::sharpe_ratio(&returns, StatsMode::Lenient).unwrap_or(f64::NAN);

    let roi = metrics::roi(to_f64(initial_capital), to_f64(final_capital), StatsMode::Lenient)
        .unwrap_or(f64::NAN);

    BacktestMetrics {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        profit_factor,
        max_drawdown_pct,
        sharpe_ratio,
        total_pnl: final_capital - initial_capital,
        roi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn make_klines(prices: &[i64]) -> Vec<Kline> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let price = Decimal::from(p);
                Kline {
                    open_time: (i as i64) * 60000,
                    open: price,
                    high: price + dec!(1),
                    low: price - dec!(1),
                    close: price,
                    volume: dec!(100),
                    close_time: ((i + 1) as i64) * 60000 - 1,
                }
            })
            .collect()
    }

    /// Emits a scripted setup on every bar whose history length is listed
    struct Scripted {
        on: Vec<usize>,
        side: TradeSide,
        stop_offset: Decimal,
        target_offset: Decimal,
        trained_with: Arc<Mutex<Option<usize>>>,
    }

    impl Scripted {
        fn every_bar(side: TradeSide) -> Self {
            Self {
                on: (0..1000).collect(),
                side,
                stop_offset: dec!(5),
                target_offset: dec!(10),
                trained_with: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn train(&mut self, warmup: &[Kline]) -> anyhow::Result<()> {
            *self.trained_with.lock().unwrap() = Some(warmup.len());
            Ok(())
        }

        async fn analyze(&mut self, history: &[Kline]) -> anyhow::Result<Vec<TradeSetup>> {
            if !self.on.contains(&history.len()) {
                return Ok(Vec::new());
            }
            let entry = history.last().map(|k| k.close).unwrap_or(dec!(100));
            let (stop_loss, take_profit) = match self.side {
                TradeSide::Long => (entry - self.stop_offset, entry + self.target_offset),
                TradeSide::Short => (entry + self.stop_offset, entry - self.target_offset),
            };
            Ok(vec![TradeSetup {
                side: self.side,
                entry_price: entry,
                stop_loss,
                take_profit,
                strategy: "scripted".to_string(),
            }])
        }
    }

    struct Failing;

    #[async_trait]
    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn analyze(&mut self, _history: &[Kline]) -> anyhow::Result<Vec<TradeSetup>> {
            anyhow::bail!("model unavailable")
        }
    }

    /// Random but seeded long/short setups
    struct Noisy {
        rng: StdRng,
    }

    #[async_trait]
    impl Strategy for Noisy {
        fn name(&self) -> &str {
            "noisy"
        }

        async fn analyze(&mut self, history: &[Kline]) -> anyhow::Result<Vec<TradeSetup>> {
            let count = self.rng.gen_range(0..3);
            let entry = history.last().map(|k| k.close).unwrap_or(dec!(100));
            Ok((0..count)
                .map(|_| {
                    let side = if self.rng.gen_bool(0.5) {
                        TradeSide::Long
                    } else {
                        TradeSide::Short
                    };
                    let stop = Decimal::from(self.rng.gen_range(1..10));
                    let target = Decimal::from(self.rng.gen_range(1..20));
                    TradeSetup {
                        side,
                        entry_price: entry,
                        stop_loss: entry - stop * side.sign(),
                        take_profit: entry + target * side.sign(),
                        strategy: "noisy".to_string(),
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_empty_klines() {
        let mut engine = BacktestEngine::new(
            Box::new(Scripted::every_bar(TradeSide::Long)),
            BacktestConfig::default(),
        );
        let result = engine.run(&[]).await.unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.final_capital, dec!(10000));
        assert_eq!(result.metrics.total_trades, 0);
        assert_eq!(result.metrics.total_pnl, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_warmup_consumes_whole_series() {
        let config = BacktestConfig {
            warmup: 3,
            ..Default::default()
        };
        let mut engine =
            BacktestEngine::new(Box::new(Scripted::every_bar(TradeSide::Long)), config);
        let result = engine.run(&make_klines(&[100, 101, 102])).await.unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.final_capital, dec!(10000));
    }

    #[tokio::test]
    async fn test_warmup_longer_than_series_rejected() {
        let config = BacktestConfig {
            warmup: 4,
            ..Default::default()
        };
        let mut engine =
            BacktestEngine::new(Box::new(Scripted::every_bar(TradeSide::Long)), config);
        let err = engine.run(&make_klines(&[100, 101, 102])).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_invalid_risk_rejected() {
        let config = BacktestConfig {
            risk_per_trade: dec!(1.5),
            ..Default::default()
        };
        let mut engine =
            BacktestEngine::new(Box::new(Scripted::every_bar(TradeSide::Long)), config);
        assert!(engine.run(&make_klines(&[100])).await.is_err());
    }

    #[tokio::test]
    async fn test_train_receives_warmup_only() {
        let strategy = Scripted::every_bar(TradeSide::Long);
        let trained_with = strategy.trained_with.clone();
        let config = BacktestConfig {
            warmup: 2,
            ..Default::default()
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), config);
        engine.run(&make_klines(&[100, 101, 102, 103])).await.unwrap();
        assert_eq!(*trained_with.lock().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_literal_exit_policy_long_loses_stop_distance() {
        // Long, stop 5 below: position = 10000 * 0.02 / 5 = 40, exit at stop => -200
        let strategy = Scripted {
            on: vec![1],
            ..Scripted::every_bar(TradeSide::Long)
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), BacktestConfig::default());
        let result = engine.run(&make_klines(&[100, 100, 100])).await.unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.position_size, dec!(40));
        assert_eq!(trade.exit_price, dec!(95));
        assert_eq!(trade.pnl, dec!(-200));
        assert_eq!(result.final_capital, dec!(9800));
    }

    #[tokio::test]
    async fn test_literal_exit_policy_short_hits_target() {
        // Short, stop 5 above: position 40, exit at target 90 => +400
        let strategy = Scripted {
            on: vec![1],
            ..Scripted::every_bar(TradeSide::Short)
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), BacktestConfig::default());
        let result = engine.run(&make_klines(&[100, 100])).await.unwrap();
        assert_eq!(result.trades[0].pnl, dec!(400));
        assert_eq!(result.metrics.winning_trades, 1);
    }

    #[tokio::test]
    async fn test_take_profit_policy_compounds_capital() {
        let config = BacktestConfig {
            exit_policy: ExitPolicy::TakeProfit,
            ..Default::default()
        };
        let strategy = Scripted {
            on: vec![1, 2],
            ..Scripted::every_bar(TradeSide::Long)
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), config);
        let result = engine.run(&make_klines(&[100, 100, 100])).await.unwrap();

        // First: size 40, +400. Second sized from 10400: size 41.6, +416
        assert_eq!(result.trades[0].pnl, dec!(400));
        assert_eq!(result.trades[1].position_size, dec!(41.6));
        assert_eq!(result.trades[1].pnl, dec!(416));
        assert_eq!(result.final_capital, dec!(10816));
    }

    #[tokio::test]
    async fn test_zero_stop_distance_is_fatal() {
        let strategy = Scripted {
            on: vec![1],
            stop_offset: Decimal::ZERO,
            ..Scripted::every_bar(TradeSide::Long)
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), BacktestConfig::default());
        let err = engine.run(&make_klines(&[100, 100])).await.unwrap_err();
        assert!(matches!(err, EngineError::ZeroStopDistance { .. }));
    }

    #[tokio::test]
    async fn test_sizing_overflow_is_an_error() {
        // 1_000_000 * 0.02 / 1e-25 exceeds Decimal's range
        let strategy = Scripted {
            on: vec![1],
            stop_offset: dec!(0.0000000000000000000000001),
            ..Scripted::every_bar(TradeSide::Long)
        };
        let config = BacktestConfig {
            initial_capital: dec!(1000000),
            ..Default::default()
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), config);
        let err = engine.run(&make_klines(&[100, 100])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Overflow { bar_index: 1, .. }
        ));
    }

    /// Records the history length handed to each `analyze` call
    struct Recorder {
        seen: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Strategy for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn analyze(&mut self, history: &[Kline]) -> anyhow::Result<Vec<TradeSetup>> {
            self.seen.lock().unwrap().push(history.len());
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_analyze_sees_bars_before_trigger() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = BacktestConfig {
            warmup: 2,
            ..Default::default()
        };
        let mut engine = BacktestEngine::new(
            Box::new(Recorder { seen: seen.clone() }),
            config,
        );
        engine.run(&make_klines(&[100, 101, 102, 103, 104])).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_entry_is_previous_close() {
        let strategy = Scripted {
            on: vec![2],
            ..Scripted::every_bar(TradeSide::Long)
        };
        let mut engine = BacktestEngine::new(Box::new(strategy), BacktestConfig::default());
        let result = engine.run(&make_klines(&[100, 105, 110])).await.unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].bar_index, 2);
        assert_eq!(result.trades[0].entry_price, dec!(105));
    }

    #[tokio::test]
    async fn test_strategy_error_propagates() {
        let mut engine = BacktestEngine::new(Box::new(Failing), BacktestConfig::default());
        let err = engine.run(&make_klines(&[100, 101])).await.unwrap_err();
        assert!(matches!(err, EngineError::Strategy(_)));
        assert_eq!(err.to_string(), "model unavailable");
    }

    #[tokio::test]
    async fn test_warmup_bars_never_trigger_trades() {
        let config = BacktestConfig {
            warmup: 5,
            exit_policy: ExitPolicy::TakeProfit,
            ..Default::default()
        };
        let mut engine =
            BacktestEngine::new(Box::new(Scripted::every_bar(TradeSide::Long)), config);
        let prices: Vec<i64> = (0..20).map(|i| 100 + i).collect();
        let result = engine.run(&make_klines(&prices)).await.unwrap();

        assert_eq!(result.trades.len(), 15);
        assert!(result.trades.iter().all(|t| t.bar_index >= 5));
        assert_eq!(result.trades[0].bar_index, 5);
        assert_eq!(result.trades[0].timestamp, 5 * 60000);
    }

    #[tokio::test]
    async fn test_capital_conservation_and_determinism() {
        let prices: Vec<i64> = (0..200).map(|i| 100 + (i * 7) % 23).collect();
        let klines = make_klines(&prices);

        for seed in [1u64, 7, 42] {
            let mut first = BacktestEngine::new(
                Box::new(Noisy {
                    rng: StdRng::seed_from_u64(seed),
                }),
                BacktestConfig {
                    warmup: 10,
                    ..Default::default()
                },
            );
            let mut second = BacktestEngine::new(
                Box::new(Noisy {
                    rng: StdRng::seed_from_u64(seed),
                }),
                BacktestConfig {
                    warmup: 10,
                    ..Default::default()
                },
            );

            let a = first.run(&klines).await.unwrap();
            let b = second.run(&klines).await.unwrap();

            assert!(!a.trades.is_empty());
            let replayed = a
                .trades
                .iter()
                .fold(a.initial_capital, |capital, t| capital + t.pnl);
            assert_eq!(a.final_capital, replayed);

            let mut running = a.initial_capital;
            for trade in &a.trades {
                running += trade.pnl;
                assert_eq!(running, trade.capital_after);
            }

            assert_eq!(a.trades, b.trades);
            assert_eq!(a.final_capital, b.final_capital);
        }
    }

    #[test]
    fn test_profit_factor_without_losses() {
        let trade = TradeResult {
            strategy: "t".to_string(),
            side: TradeSide::Long,
            entry_price: dec!(100),
            exit_price: dec!(110),
            stop_loss: dec!(95),
            take_profit: dec!(110),
            position_size: dec!(1),
            pnl: dec!(10),
            bar_index: 0,
            timestamp: 0,
            capital_after: dec!(1010),
        };
        let curve = vec![
            EquityPoint { time: 0, equity: dec!(1000) },
            EquityPoint { time: 0, equity: dec!(1010) },
        ];
        let metrics = calculate_metrics(&[trade.clone(), trade], dec!(1000), dec!(1020), &curve);
        assert_eq!(metrics.profit_factor, dec!(20));
        assert_eq!(metrics.win_rate, 100.0);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_break_even_trade_is_neither_win_nor_loss() {
        let trade = |pnl: Decimal, capital_after: Decimal| TradeResult {
            strategy: "t".to_string(),
            side: TradeSide::Long,
            entry_price: dec!(100),
            exit_price: dec!(100),
            stop_loss: dec!(95),
            take_profit: dec!(110),
            position_size: dec!(1),
            pnl,
            bar_index: 0,
            timestamp: 0,
            capital_after,
        };
        let trades = [
            trade(dec!(10), dec!(1010)),
            trade(Decimal::ZERO, dec!(1010)),
            trade(dec!(-5), dec!(1005)),
        ];
        let curve: Vec<EquityPoint> = [1000, 1010, 1010, 1005]
            .iter()
            .map(|&e| EquityPoint {
                time: 0,
                equity: Decimal::from(e),
            })
            .collect();
        let metrics = calculate_metrics(&trades, dec!(1000), dec!(1005), &curve);
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
    }

    #[test]
    fn test_metrics_drawdown_and_win_rate() {
        let curve: Vec<EquityPoint> = [1000, 1200, 900, 1100]
            .iter()
            .map(|&e| EquityPoint {
                time: 0,
                equity: Decimal::from(e),
            })
            .collect();
        let metrics = calculate_metrics(&[], dec!(1000), dec!(1100), &curve);
        assert!((metrics.max_drawdown_pct - 25.0).abs() < 1e-9);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.sharpe_ratio.is_nan());
        assert!((metrics.roi - 0.1).abs() < 1e-12);
    }
}
