//! Error types for advanced risk models

use thiserror::Error;

/// Errors that can occur in advanced risk calculations
#[derive(Error, Debug)]
pub enum AdvancedRiskError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Matrix operation failed: {0}")]
    MatrixError(String),

    #[error("Division by zero in calculation: {0}")]
    DivisionByZero(String),
}

pub type Result<T> = std::result::Result<T, AdvancedRiskError>;
