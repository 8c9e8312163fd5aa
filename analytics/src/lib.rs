//! # bt-analytics: metrics, sanity reports, and portfolio optimization
//!
//! Computes the performance metrics attached to a completed backtest, the
//! Monte-Carlo/K-fold sanity report that accompanies it, and the
//! projected-gradient portfolio optimizer that allocates weight across a
//! basket of strategies.
//!
//! ## Modules
//!
//! - [`metrics`]: CAGR, volatility, drawdown, Sharpe/Sortino/Calmar/Treynor,
//!   date-aligned beta
//! - [`sanity`]: moving-block bootstrap, K-fold shard stability, per-benchmark
//!   betas
//! - [`optimizer`]: covariance-aware weight allocation across strategies
//! - [`advanced`]: the underlying portfolio risk-decomposition engine
//!   [`optimizer`] builds on
//!
//! ## Example
//!
//! ```rust,no_run
//! use bt_analytics::metrics::compute_metrics;
//! use bt_core::BacktestResult;
//!
//! fn report(result: &BacktestResult) {
//!     let metrics = compute_metrics(result, bt_analytics::metrics::DEFAULT_RF, None);
//!     println!("CAGR: {:.2}%", metrics.cagr * 100.0);
//! }
//! ```

pub mod advanced;
pub mod config;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod sanity;

pub use config::{OptimizerConfig, OptimizerMetric, SanityConfig, BENCHMARK_TICKERS, MIN_ALIGNED_DAYS};
pub use error::{AnalyticsError, AnalyticsResult};
pub use optimizer::{optimize, OptimizedAllocation};
pub use sanity::{compute_sanity_report, SanityReport};
