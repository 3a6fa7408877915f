//! Engine error type

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid backtest config: {0}")]
    InvalidConfig(String),

    #[error("Zero stop distance for {strategy} setup at entry {entry}")]
    ZeroStopDistance { strategy: String, entry: Decimal },

    #[error("Arithmetic overflow sizing {strategy} setup at bar {bar_index}")]
    Overflow { strategy: String, bar_index: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(&'static str),

    #[error("Metrics store error: {0}")]
    Persistence(String),

    /// Errors raised by a strategy's `train` or `analyze`, passed through untouched
    #[error(transparent)]
    Strategy(anyhow::Error),
}

impl From<persistence::DbError> for EngineError {
    fn from(e: persistence::DbError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
