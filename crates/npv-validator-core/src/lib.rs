pub mod amortization;
pub mod audit;
pub mod backtest;
pub mod comparison;
pub mod config;
pub mod data_quality;
pub mod datasets;
pub mod discounting;
pub mod error;
pub mod governance;
pub mod npv_engine;
pub mod statistics;
pub mod stress;
pub mod types;
pub mod validator;

mod parallel;

pub use error::NpvValidatorError;
pub use types::*;

/// Standard result type for all validator operations
pub type NpvValidatorResult<T> = Result<T, NpvValidatorError>;
