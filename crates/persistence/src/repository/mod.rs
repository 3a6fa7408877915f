//! Repository implementations for database operations

pub mod backtest;
pub mod metrics;

pub use backtest::*;
pub use metrics::*;
