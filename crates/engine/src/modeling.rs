//! Financial modeling service
//!
//! Computes risk/return metrics for a model's price history, records them in a
//! [`MetricsStore`], and turns them into a confidence score and a discrete
//! recommendation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use persistence::repository::{MetricsRepository, ModelMetricRecord};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::{self, StatsMode};

pub const METRIC_SHARPE: &str = "sharpe_ratio";
pub const METRIC_SORTINO: &str = "sortino_ratio";
pub const METRIC_MAX_DRAWDOWN: &str = "max_drawdown";
pub const METRIC_ROI: &str = "roi";

/// One stored metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub model_id: String,
    pub metric_type: String,
    pub value: f64,
    pub metadata: serde_json::Value,
}

/// Destination for computed metrics
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Insert all rows or none
    async fn insert_metrics(&self, rows: &[MetricRow]) -> EngineResult<()>;

    /// Stored rows for a model, newest first
    async fn metrics_for_model(&self, model_id: &str) -> EngineResult<Vec<MetricRow>>;
}

/// In-memory store (tests, ephemeral CLI runs)
#[derive(Default)]
pub struct MemoryMetricsStore {
    rows: RwLock<Vec<MetricRow>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn insert_metrics(&self, rows: &[MetricRow]) -> EngineResult<()> {
        self.rows.write().await.extend_from_slice(rows);
        Ok(())
    }

    async fn metrics_for_model(&self, model_id: &str) -> EngineResult<Vec<MetricRow>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect())
    }
}

/// SQLite-backed store over the `model_metrics` table
#[derive(Clone)]
pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn insert_metrics(&self, rows: &[MetricRow]) -> EngineResult<()> {
        let records: Vec<ModelMetricRecord> = rows
            .iter()
            .map(|row| ModelMetricRecord {
                id: None,
                model_id: row.model_id.clone(),
                metric_type: row.metric_type.clone(),
                value: Some(row.value),
                metadata: row.metadata.to_string(),
                created_at: None,
            })
            .collect();

        MetricsRepository::new(&self.pool)
            .insert_batch(&records)
            .await?;
        Ok(())
    }

    async fn metrics_for_model(&self, model_id: &str) -> EngineResult<Vec<MetricRow>> {
        let records = MetricsRepository::new(&self.pool)
            .get_by_model(model_id)
            .await?;

        Ok(records
            .into_iter()
            .map(|r| MetricRow {
                model_id: r.model_id,
                metric_type: r.metric_type,
                value: r.value.unwrap_or(f64::NAN),
                metadata: serde_json::from_str(&r.metadata).unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }
}

/// Discrete recommendation derived from confidence, drawdown and ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Buy,
    Hold,
    Reduce,
    Sell,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Recommendation::StrongBuy => "Strong Buy",
            Recommendation::Buy => "Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Reduce => "Reduce",
            Recommendation::Sell => "Sell",
        };
        f.write_str(label)
    }
}

/// Output of [`FinancialModelingService::analyze_strategy`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialAnalysis {
    pub model_id: String,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Fraction, 0–1
    pub max_drawdown: f64,
    pub roi: f64,
    /// 0–100
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub sample_size: usize,
    pub analyzed_at: DateTime<Utc>,
}

/// Maps a Sharpe/Sortino ratio onto 0–1. NaN counts as no evidence.
fn normalize_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return 0.0;
    }
    ((ratio + 2.0) / 4.0).clamp(0.0, 1.0)
}

/// Weighted 0–100 score: 40% Sharpe, 40% Sortino, 20% (1 - drawdown)
pub fn confidence_score(sharpe: f64, sortino: f64, max_drawdown: f64) -> f64 {
    let drawdown_score = (1.0 - max_drawdown).clamp(0.0, 1.0);
    (normalize_ratio(sharpe) * 0.4 + normalize_ratio(sortino) * 0.4 + drawdown_score * 0.2) * 100.0
}

pub fn generate_recommendation(confidence: f64, max_drawdown: f64, roi: f64) -> Recommendation {
    if confidence >= 80.0 && max_drawdown < 0.1 && roi > 0.05 {
        Recommendation::StrongBuy
    } else if confidence >= 60.0 && max_drawdown < 0.15 && roi > 0.0 {
        Recommendation::Buy
    } else if confidence >= 40.0 && max_drawdown < 0.2 {
        Recommendation::Hold
    } else if confidence >= 20.0 {
        Recommendation::Reduce
    } else {
        Recommendation::Sell
    }
}

pub struct FinancialModelingService {
    store: Arc<dyn MetricsStore>,
    mode: StatsMode,
}

impl FinancialModelingService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self {
            store,
            mode: StatsMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: StatsMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compute, record and score the metrics of `prices`.
    ///
    /// A store failure aborts the whole analysis.
    pub async fn analyze_strategy(
        &self,
        model_id: &str,
        prices: &[f64],
    ) -> EngineResult<FinancialAnalysis> {
        let returns = metrics::simple_returns(prices);

        let sharpe_ratio = metrics::sharpe_ratio(&returns, self.mode)?;
        let sortino_ratio = metrics::sortino_ratio(&returns, self.mode)?;
        let max_drawdown = metrics::max_drawdown(prices, self.mode)?;
        let roi = match (prices.first(), prices.last()) {
            (Some(&start), Some(&end)) => metrics::roi(start, end, self.mode)?,
            _ => self.mode.undefined("roi needs at least one price")?,
        };

        let analyzed_at = Utc::now();
        let metadata = json!({
            "sample_size": prices.len(),
            "calculated_at": analyzed_at.to_rfc3339(),
        });
        let rows: Vec<MetricRow> = [
            (METRIC_SHARPE, sharpe_ratio),
            (METRIC_SORTINO, sortino_ratio),
            (METRIC_MAX_DRAWDOWN, max_drawdown),
            (METRIC_ROI, roi),
        ]
        .into_iter()
        .map(|(metric_type, value)| MetricRow {
            model_id: model_id.to_string(),
            metric_type: metric_type.to_string(),
            value,
            metadata: metadata.clone(),
        })
        .collect();

        self.store.insert_metrics(&rows).await.map_err(|e| {
            warn!(model_id, error = %e, "Failed to record model metrics");
            match e {
                EngineError::Persistence(_) => e,
                other => EngineError::Persistence(other.to_string()),
            }
        })?;

        let confidence = confidence_score(sharpe_ratio, sortino_ratio, max_drawdown);
        let recommendation = generate_recommendation(confidence, max_drawdown, roi);

        info!(
            model_id,
            sharpe = sharpe_ratio,
            sortino = sortino_ratio,
            max_drawdown,
            roi,
            confidence,
            %recommendation,
            "Model analyzed"
        );

        Ok(FinancialAnalysis {
            model_id: model_id.to_string(),
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            roi,
            confidence,
            recommendation,
            sample_size: prices.len(),
            analyzed_at,
        })
    }

    pub async fn history(&self, model_id: &str) -> EngineResult<Vec<MetricRow>> {
        self.store.metrics_for_model(model_id).await
    }
}
