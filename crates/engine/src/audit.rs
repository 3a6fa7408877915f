//! Threshold rules over settled trades
//!
//! Rules are evaluated independently against every trade; each breach yields
//! one finding.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::TradeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRuleKind {
    /// entry price × position size above `limit`
    MaxNotional { limit: Decimal },
    /// Absolute loss above `limit`
    MaxLoss { limit: Decimal },
    /// Loss as a percentage of the capital the trade was sized from
    MaxLossPct { pct: Decimal },
    /// |exit − entry| / entry as a percentage
    MaxPriceMovePct { pct: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRule {
    pub name: String,
    pub kind: AuditRuleKind,
    pub severity: Severity,
}

impl AuditRule {
    pub fn new(name: &str, kind: AuditRuleKind, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            kind,
            severity,
        }
    }

    /// Observed value and limit when the trade breaches this rule
    fn check(&self, trade: &TradeResult) -> Option<(Decimal, Decimal)> {
        let hundred = dec!(100);
        let loss = (-trade.pnl).max(Decimal::ZERO);

        let (observed, limit) = match &self.kind {
            AuditRuleKind::MaxNotional { limit } => {
                (trade.entry_price * trade.position_size, *limit)
            }
            AuditRuleKind::MaxLoss { limit } => (loss, *limit),
            AuditRuleKind::MaxLossPct { pct } => {
                let before = trade.capital_after - trade.pnl;
                if before <= Decimal::ZERO {
                    return None;
                }
                (loss / before * hundred, *pct)
            }
            AuditRuleKind::MaxPriceMovePct { pct } => {
                if trade.entry_price.is_zero() {
                    return None;
                }
                (
                    (trade.exit_price - trade.entry_price).abs() / trade.entry_price * hundred,
                    *pct,
                )
            }
        };

        (observed > limit).then_some((observed, limit))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub rule: String,
    pub severity: Severity,
    /// Position of the trade in the audited list
    pub trade_index: usize,
    pub bar_index: usize,
    pub observed: Decimal,
    pub limit: Decimal,
}

/// Default limits for a fixed-fractional backtest
pub fn default_rules() -> Vec<AuditRule> {
    vec![
        AuditRule::new(
            "loss_over_5pct_of_capital",
            AuditRuleKind::MaxLossPct { pct: dec!(5) },
            Severity::Critical,
        ),
        AuditRule::new(
            "price_move_over_20pct",
            AuditRuleKind::MaxPriceMovePct { pct: dec!(20) },
            Severity::Warning,
        ),
        AuditRule::new(
            "notional_over_1m",
            AuditRuleKind::MaxNotional {
                limit: dec!(1000000),
            },
            Severity::Info,
        ),
    ]
}

/// Evaluate every rule against every trade, in trade order
pub fn audit_trades(rules: &[AuditRule], trades: &[TradeResult]) -> Vec<AuditFinding> {
    let findings: Vec<AuditFinding> = trades
        .iter()
        .enumerate()
        .flat_map(|(i, trade)| {
            rules.iter().filter_map(move |rule| {
                rule.check(trade).map(|(observed, limit)| AuditFinding {
                    rule: rule.name.clone(),
                    severity: rule.severity,
                    trade_index: i,
                    bar_index: trade.bar_index,
                    observed,
                    limit,
                })
            })
        })
        .collect();

    debug!(
        trades = trades.len(),
        rules = rules.len(),
        findings = findings.len(),
        "Audit complete"
    );
    findings
}

/// Highest severity among the findings, if any
pub fn worst_severity(findings: &[AuditFinding]) -> Option<Severity> {
    findings.iter().map(|f| f.severity).max()
}
