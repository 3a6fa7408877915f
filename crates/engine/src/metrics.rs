//! Risk and return statistics over price and return series
//!
//! All functions are pure. Degenerate input is handled according to
//! [`StatsMode`]: `Lenient` returns NaN for a ratio whose denominator is zero,
//! `Strict` returns [`EngineError::InsufficientData`] instead. A drawdown over
//! fewer than two points is 0.0 in lenient mode.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Policy for empty series, zero deviation and zero start price
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    #[default]
    Lenient,
    Strict,
}

impl StatsMode {
    pub(crate) fn undefined(self, reason: &'static str) -> EngineResult<f64> {
        match self {
            StatsMode::Lenient => Ok(f64::NAN),
            StatsMode::Strict => Err(EngineError::InsufficientData(reason)),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean return over population standard deviation (unannualized)
pub fn sharpe_ratio(returns: &[f64], mode: StatsMode) -> EngineResult<f64> {
    if returns.is_empty() {
        return mode.undefined("sharpe ratio needs at least one return");
    }

    let avg = mean(returns);
    let variance = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return mode.undefined("sharpe ratio undefined for zero deviation");
    }

    Ok(avg / std_dev)
}

/// Mean return over downside deviation (RMS of the negative returns only)
pub fn sortino_ratio(returns: &[f64], mode: StatsMode) -> EngineResult<f64> {
    if returns.is_empty() {
        return mode.undefined("sortino ratio needs at least one return");
    }

    let avg = mean(returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return mode.undefined("sortino ratio undefined without negative returns");
    }

    let downside_dev = (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();

    Ok(avg / downside_dev)
}

/// Largest peak-to-trough decline as a fraction of the running peak (0–1)
pub fn max_drawdown(prices: &[f64], mode: StatsMode) -> EngineResult<f64> {
    if prices.len() < 2 && mode == StatsMode::Strict {
        return Err(EngineError::InsufficientData(
            "max drawdown needs at least two prices",
        ));
    }

    let mut peak = match prices.first() {
        Some(&p) => p,
        None => return Ok(0.0),
    };
    let mut max_dd = 0.0_f64;

    for &price in prices {
        if price > peak {
            peak = price;
        }
        if peak > 0.0 {
            let dd = (peak - price) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    Ok(max_dd)
}

/// Return on investment between two prices
pub fn roi(start: f64, end: f64, mode: StatsMode) -> EngineResult<f64> {
    if start == 0.0 {
        return mode.undefined("roi undefined for a zero start price");
    }
    Ok((end - start) / start)
}

/// Simple returns between consecutive prices. A zero previous price yields NaN.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                f64::NAN
            } else {
                (w[1] - w[0]) / w[0]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_roi() {
        let r = roi(100.0, 110.0, StatsMode::Lenient).unwrap();
        assert!((r - 0.1).abs() < EPS);
    }

    #[test]
    fn test_max_drawdown_recovers_to_new_peak() {
        let dd = max_drawdown(&[100.0, 90.0, 95.0, 80.0, 120.0], StatsMode::Lenient).unwrap();
        assert!((dd - 0.2).abs() < EPS);
    }

    #[test]
    fn test_max_drawdown_degenerate() {
        assert_eq!(max_drawdown(&[], StatsMode::Lenient).unwrap(), 0.0);
        assert_eq!(max_drawdown(&[42.0], StatsMode::Lenient).unwrap(), 0.0);
        assert!(matches!(
            max_drawdown(&[42.0], StatsMode::Strict),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_sharpe_population_stdev() {
        // mean 0.0233.., population stdev 0.0618..
        let returns: [f64; 3] = [0.1, -0.05, 0.02];
        let avg = (0.1 - 0.05 + 0.02) / 3.0;
        let var = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / 3.0;
        let s = sharpe_ratio(&returns, StatsMode::Lenient).unwrap();
        assert!((s - avg / var.sqrt()).abs() < EPS);
    }

    #[test]
    fn test_sharpe_degenerate_lenient_is_nan() {
        assert!(sharpe_ratio(&[], StatsMode::Lenient).unwrap().is_nan());
        assert!(sharpe_ratio(&[0.01, 0.01], StatsMode::Lenient).unwrap().is_nan());
    }

    #[test]
    fn test_sharpe_degenerate_strict_errors() {
        assert!(sharpe_ratio(&[], StatsMode::Strict).is_err());
        assert!(sharpe_ratio(&[0.01], StatsMode::Strict).is_err());
    }

    #[test]
    fn test_sortino_downside_only() {
        let returns = [0.1, -0.05, 0.02, -0.01];
        let avg = 0.06 / 4.0;
        let downside = ((0.05_f64.powi(2) + 0.01_f64.powi(2)) / 2.0).sqrt();
        let s = sortino_ratio(&returns, StatsMode::Lenient).unwrap();
        assert!((s - avg / downside).abs() < EPS);
    }

    #[test]
    fn test_sortino_without_losses() {
        assert!(sortino_ratio(&[0.1, 0.2], StatsMode::Lenient).unwrap().is_nan());
        assert!(sortino_ratio(&[0.1, 0.2], StatsMode::Strict).is_err());
    }

    #[test]
    fn test_roi_zero_start() {
        assert!(roi(0.0, 10.0, StatsMode::Lenient).unwrap().is_nan());
        assert!(roi(0.0, 10.0, StatsMode::Strict).is_err());
    }

    #[test]
    fn test_simple_returns() {
        let r = simple_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < EPS);
        assert!((r[1] + 0.1).abs() < EPS);
        assert!(simple_returns(&[100.0]).is_empty());
    }
}
