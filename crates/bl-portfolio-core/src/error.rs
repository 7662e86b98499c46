use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerical error in {context}: {suggestion}")]
    Numerical { context: String, suggestion: String },

    #[error("Configuration error: {field} — {reason}")]
    Configuration { field: String, reason: String },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Coarse classification used by callers to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller supplied malformed or inconsistent data; fix the request.
    Validation,
    /// The data is well formed but numerically degenerate.
    Numerical,
    /// A strategy or style name could not be resolved.
    Configuration,
    Internal,
}

impl PortfolioError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PortfolioError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PortfolioError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Singular or non-positive-definite matrix, with the standard remedy attached.
    pub fn singular(context: impl Into<String>) -> Self {
        PortfolioError::Numerical {
            context: context.into(),
            suggestion: "matrix is singular or near-singular; widen the date range \
                         or diversify the ticker set"
                .into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PortfolioError::InvalidInput { .. }
            | PortfolioError::InsufficientData(_)
            | PortfolioError::DateError(_) => ErrorCategory::Validation,
            PortfolioError::Numerical { .. } | PortfolioError::DivisionByZero { .. } => {
                ErrorCategory::Numerical
            }
            PortfolioError::Configuration { .. } => ErrorCategory::Configuration,
            PortfolioError::SerializationError(_) => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for PortfolioError {
    fn from(e: serde_json::Error) -> Self {
        PortfolioError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            PortfolioError::invalid("views", "bad").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            PortfolioError::InsufficientData("x".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            PortfolioError::singular("covariance").category(),
            ErrorCategory::Numerical
        );
        assert_eq!(
            PortfolioError::config("rebalance_frequency", "unknown").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_singular_message_mentions_remedy() {
        let msg = PortfolioError::singular("tau * Sigma").to_string();
        assert!(msg.contains("tau * Sigma"));
        assert!(msg.contains("widen the date range"));
    }
}
