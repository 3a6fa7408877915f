//! Model metrics repository — one row per computed metric

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted metric value for a model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelMetricRecord {
    pub id: Option<i64>,
    pub model_id: String,
    pub metric_type: String,
    /// `None` when the metric was undefined (NaN) for the sample
    pub value: Option<f64>,
    /// JSON object
    pub metadata: String,
    pub created_at: Option<i64>,
}

/// Repository for model metrics
pub struct MetricsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MetricsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch of metric rows atomically. Returns the number of rows written.
    pub async fn insert_batch(&self, records: &[ModelMetricRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"INSERT INTO model_metrics (model_id, metric_type, value, metadata)
                   VALUES (?1, ?2, ?3, ?4)"#,
            )
            .bind(&record.model_id)
            .bind(&record.metric_type)
            .bind(record.value.filter(|v| v.is_finite()))
            .bind(&record.metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    /// All metrics recorded for a model, newest first
    pub async fn get_by_model(&self, model_id: &str) -> DbResult<Vec<ModelMetricRecord>> {
        let records = sqlx::query_as::<_, ModelMetricRecord>(
            r#"SELECT id, model_id, metric_type, value, metadata, created_at
               FROM model_metrics
               WHERE model_id = ?1
               ORDER BY id DESC"#,
        )
        .bind(model_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Latest value of one metric type for a model
    pub async fn latest(
        &self,
        model_id: &str,
        metric_type: &str,
    ) -> DbResult<Option<ModelMetricRecord>> {
        let record = sqlx::query_as::<_, ModelMetricRecord>(
            r#"SELECT id, model_id, metric_type, value, metadata, created_at
               FROM model_metrics
               WHERE model_id = ?1 AND metric_type = ?2
               ORDER BY id DESC
               LIMIT 1"#,
        )
        .bind(model_id)
        .bind(metric_type)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }
}
