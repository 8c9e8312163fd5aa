//! Error type for the metrics, sanity-report, and optimizer modules.

use thiserror::Error;

/// Errors surfaced by `bt-analytics`. Sanity and optimizer paths return
/// without caching on any of these (the cache crate never sees a partial
/// result).
#[derive(Error, Debug)]
pub enum AnalyticsError {
    /// Fewer aligned observations than a computation requires (e.g. <50 days
    /// for a sanity report, or <2 strategies with >=50 aligned days for the
    /// optimizer).
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// An out-of-range or structurally invalid configuration value.
    #[error("config error: {0}")]
    ConfigError(String),

    /// A computation produced a non-finite or otherwise invalid result
    /// (division by a zero variance, negative variance from a singular
    /// matrix, etc).
    #[error("numerical error: {0}")]
    NumericalError(String),
}

impl From<crate::advanced::AdvancedRiskError> for AnalyticsError {
    fn from(err: crate::advanced::AdvancedRiskError) -> Self {
        use crate::advanced::AdvancedRiskError as E;
        match err {
            E::InsufficientData(m) => AnalyticsError::InsufficientData(m),
            E::InvalidParameter(m) => AnalyticsError::ConfigError(m),
            other => AnalyticsError::NumericalError(other.to_string()),
        }
    }
}

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;
