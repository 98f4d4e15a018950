use thiserror::Error;

#[derive(Debug, Error)]
pub enum NpvValidatorError {
    #[error("Data integrity failure in {dataset}: {reason}")]
    DataIntegrity { dataset: String, reason: String },

    #[error("Curve gap: no discount factor for period {period} on curve {curve}")]
    CurveGap { period: u32, curve: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Numeric overflow in {context}")]
    NumericOverflow { context: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NpvValidatorError {
    pub fn data_integrity(dataset: impl Into<String>, reason: impl Into<String>) -> Self {
        NpvValidatorError::DataIntegrity {
            dataset: dataset.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NpvValidatorError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the whole run rather than a single loan or test.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NpvValidatorError::DataIntegrity { .. })
    }
}

impl From<serde_json::Error> for NpvValidatorError {
    fn from(e: serde_json::Error) -> Self {
        NpvValidatorError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for NpvValidatorError {
    fn from(e: std::io::Error) -> Self {
        NpvValidatorError::Serialization(e.to_string())
    }
}
