//! # Advanced quantitative building blocks
//!
//! Covariance/correlation construction, risk decomposition and marginal
//! VaR attribution for an existing basket of positions, reused directly by
//! [`crate::optimizer`] for its objective gradients rather than
//! reimplemented there.
//!
//! ## Modules
//!
//! - `portfolio`: Portfolio analytics and risk decomposition
//! - `error`: Advanced risk error types

mod error;
mod portfolio;

pub use error::AdvancedRiskError;
pub use portfolio::{MarginalVarResult, PortfolioAnalyzer, PortfolioConfig, Position, RiskContribution};
