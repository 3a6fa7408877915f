//! Built-in indicator strategies
//!
//! Each strategy keeps its `ta` indicator state between calls and only feeds
//! the bars it has not seen yet, so a full pass over n bars costs O(n).
//! Setups are entered at the last close of the history.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use ta::indicators::{AverageTrueRange, RelativeStrengthIndex, SimpleMovingAverage};
use ta::{Close, High, Low, Next};
use tracing::debug;

use crate::strategy::Strategy;
use crate::types::{Kline, TradeSetup, TradeSide};

impl High for Kline {
    fn high(&self) -> f64 {
        self.high.to_f64().unwrap_or(0.0)
    }
}

impl Low for Kline {
    fn low(&self) -> f64 {
        self.low.to_f64().unwrap_or(0.0)
    }
}

impl Close for Kline {
    fn close(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }
}

fn to_decimal(value: f64, what: &str) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| anyhow!("{what} is not representable: {value}"))
}

fn pct(value: f64, what: &str) -> Result<Decimal> {
    if !(value > 0.0 && value < 1.0) {
        bail!("{what} must be in (0, 1), got {value}");
    }
    to_decimal(value, what)
}

/// Percentage stop/target around an entry price
fn bracket(
    side: TradeSide,
    entry: Decimal,
    stop_pct: Decimal,
    target_pct: Decimal,
    strategy: &str,
) -> TradeSetup {
    let (stop_loss, take_profit) = match side {
        TradeSide::Long => (
            entry * (Decimal::ONE - stop_pct),
            entry * (Decimal::ONE + target_pct),
        ),
        TradeSide::Short => (
            entry * (Decimal::ONE + stop_pct),
            entry * (Decimal::ONE - target_pct),
        ),
    };
    TradeSetup {
        side,
        entry_price: entry,
        stop_loss,
        take_profit,
        strategy: strategy.to_string(),
    }
}

/// Returns the slice of `history` not yet fed, resetting when the history shrank
/// (a new run with the same instance).
fn unseen<'a>(history: &'a [Kline], seen: &mut usize, on_reset: impl FnOnce()) -> &'a [Kline] {
    if history.len() < *seen {
        on_reset();
        *seen = 0;
    }
    let fresh = &history[*seen..];
    *seen = history.len();
    fresh
}

// ============================================================================
// SMA crossover
// ============================================================================

pub struct SmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    stop_pct: Decimal,
    target_pct: Decimal,
    samples: usize,
    seen: usize,
    prev_diff: Option<f64>,
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize, stop_pct: f64, target_pct: f64) -> Result<Self> {
        if fast == 0 || fast >= slow {
            bail!("sma_cross needs 0 < fast < slow, got fast={fast} slow={slow}");
        }
        Ok(Self {
            fast_period: fast,
            slow_period: slow,
            fast: SimpleMovingAverage::new(fast).map_err(|e| anyhow!("fast SMA: {e:?}"))?,
            slow: SimpleMovingAverage::new(slow).map_err(|e| anyhow!("slow SMA: {e:?}"))?,
            stop_pct: pct(stop_pct, "stop_pct")?,
            target_pct: pct(target_pct, "target_pct")?,
            samples: 0,
            seen: 0,
            prev_diff: None,
        })
    }

    fn reset(&mut self) {
        // Periods were validated in `new`
        if let (Ok(fast), Ok(slow)) = (
            SimpleMovingAverage::new(self.fast_period),
            SimpleMovingAverage::new(self.slow_period),
        ) {
            self.fast = fast;
            self.slow = slow;
        }
        self.samples = 0;
        self.prev_diff = None;
    }
}

#[async_trait]
impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    async fn analyze(&mut self, history: &[Kline]) -> Result<Vec<TradeSetup>> {
        let mut needs_reset = false;
        let fresh = unseen(history, &mut self.seen, || needs_reset = true);
        if needs_reset {
            self.reset();
        }

        let mut cross = None;
        for kline in fresh {
            let close = kline.close();
            let diff = self.fast.next(close) - self.slow.next(close);
            self.samples += 1;
            cross = None;

            if self.samples < self.slow_period {
                continue;
            }
            if let Some(prev) = self.prev_diff {
                if prev <= 0.0 && diff > 0.0 {
                    cross = Some(TradeSide::Long);
                } else if prev >= 0.0 && diff < 0.0 {
                    cross = Some(TradeSide::Short);
                }
            }
            self.prev_diff = Some(diff);
        }

        let (Some(side), Some(last)) = (cross, history.last()) else {
            return Ok(Vec::new());
        };

        debug!(side = ?side, price = %last.close, "SMA crossover");
        Ok(vec![bracket(
            side,
            last.close,
            self.stop_pct,
            self.target_pct,
            self.name(),
        )])
    }
}

// ============================================================================
// RSI mean reversion
// ============================================================================

pub struct RsiReversionStrategy {
    period: usize,
    rsi: RelativeStrengthIndex,
    oversold: f64,
    overbought: f64,
    stop_pct: Decimal,
    target_pct: Decimal,
    samples: usize,
    seen: usize,
    prev_rsi: Option<f64>,
}

impl RsiReversionStrategy {
    pub fn new(
        period: usize,
        oversold: f64,
        overbought: f64,
        stop_pct: f64,
        target_pct: f64,
    ) -> Result<Self> {
        if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
            bail!("rsi_reversion needs 0 < oversold < overbought < 100");
        }
        Ok(Self {
            period,
            rsi: RelativeStrengthIndex::new(period).map_err(|e| anyhow!("RSI: {e:?}"))?,
            oversold,
            overbought,
            stop_pct: pct(stop_pct, "stop_pct")?,
            target_pct: pct(target_pct, "target_pct")?,
            samples: 0,
            seen: 0,
            prev_rsi: None,
        })
    }

    fn reset(&mut self) {
        if let Ok(rsi) = RelativeStrengthIndex::new(self.period) {
            self.rsi = rsi;
        }
        self.samples = 0;
        self.prev_rsi = None;
    }
}

#[async_trait]
impl Strategy for RsiReversionStrategy {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    async fn analyze(&mut self, history: &[Kline]) -> Result<Vec<TradeSetup>> {
        let mut needs_reset = false;
        let fresh = unseen(history, &mut self.seen, || needs_reset = true);
        if needs_reset {
            self.reset();
        }

        let mut signal = None;
        for kline in fresh {
            let value = self.rsi.next(kline.close());
            self.samples += 1;
            signal = None;

            if self.samples <= self.period {
                continue;
            }
            // Fire on entering a zone, not on every bar inside it
            let prev = self.prev_rsi.unwrap_or(50.0);
            if value < self.oversold && prev >= self.oversold {
                signal = Some(TradeSide::Long);
            } else if value > self.overbought && prev <= self.overbought {
                signal = Some(TradeSide::Short);
            }
            self.prev_rsi = Some(value);
        }

        let (Some(side), Some(last)) = (signal, history.last()) else {
            return Ok(Vec::new());
        };

        Ok(vec![bracket(
            side,
            last.close,
            self.stop_pct,
            self.target_pct,
            self.name(),
        )])
    }
}

// ============================================================================
// Volatility breakout (trained)
// ============================================================================

pub struct VolatilityBreakoutStrategy {
    atr_period: usize,
    multiplier: f64,
    reward_ratio: Decimal,
    /// ATR at the end of the warmup window
    baseline_atr: Option<f64>,
}

impl VolatilityBreakoutStrategy {
    pub fn new(atr_period: usize, multiplier: f64, reward_ratio: f64) -> Result<Self> {
        if atr_period == 0 {
            bail!("volatility_breakout needs atr_period > 0");
        }
        if multiplier <= 0.0 || reward_ratio <= 0.0 {
            bail!("volatility_breakout needs positive multiplier and reward_ratio");
        }
        Ok(Self {
            atr_period,
            multiplier,
            reward_ratio: to_decimal(reward_ratio, "reward_ratio")?,
            baseline_atr: None,
        })
    }

    pub fn baseline_atr(&self) -> Option<f64> {
        self.baseline_atr
    }
}

#[async_trait]
impl Strategy for VolatilityBreakoutStrategy {
    fn name(&self) -> &str {
        "volatility_breakout"
    }

    async fn train(&mut self, warmup: &[Kline]) -> Result<()> {
        if warmup.len() < self.atr_period {
            bail!(
                "volatility_breakout needs at least {} warmup bars, got {}",
                self.atr_period,
                warmup.len()
            );
        }

        let mut atr = AverageTrueRange::new(self.atr_period).map_err(|e| anyhow!("ATR: {e:?}"))?;
        let mut value = 0.0;
        for kline in warmup {
            value = atr.next(kline);
        }
        if value <= 0.0 {
            bail!("volatility_breakout warmup has no price range");
        }

        debug!(atr = value, bars = warmup.len(), "Calibrated breakout baseline");
        self.baseline_atr = Some(value);
        Ok(())
    }

    async fn analyze(&mut self, history: &[Kline]) -> Result<Vec<TradeSetup>> {
        let baseline = self
            .baseline_atr
            .context("volatility_breakout analyzed before training")?;

        let [.., prev, last] = history else {
            return Ok(Vec::new());
        };

        let move_size = last.close() - prev.close();
        if move_size.abs() <= baseline * self.multiplier {
            return Ok(Vec::new());
        }

        let side = if move_size > 0.0 {
            TradeSide::Long
        } else {
            TradeSide::Short
        };
        let entry = last.close;
        let risk = to_decimal(baseline, "baseline ATR")?;
        let reward = risk * self.reward_ratio;
        let (stop_loss, take_profit) = match side {
            TradeSide::Long => (entry - risk, entry + reward),
            TradeSide::Short => (entry + risk, entry - reward),
        };

        Ok(vec![TradeSetup {
            side,
            entry_price: entry,
            stop_loss,
            take_profit,
            strategy: self.name().to_string(),
        }])
    }
}
