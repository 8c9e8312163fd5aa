//! Configuration for the sanity report and portfolio optimizer, modeled on
//! `bt-cache`'s `StorageConfig` (nested structs, `#[serde(default = ...)]`
//! fields, `from_yaml`/`from_yaml_file` loaders instead of a derived
//! `Default` impl with field literals).

use crate::error::AnalyticsError;
use serde::{Deserialize, Serialize};

/// Monte-Carlo moving-block bootstrap + K-fold shard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanityConfig {
    /// Moving-block bootstrap contiguous block length, in trading days.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Target horizon, in years, the bootstrap resamples to (N = 252 * years).
    #[serde(default = "default_horizon_years")]
    pub horizon_years: f64,

    /// Number of bootstrap iterations.
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Number of contiguous K-fold shards.
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// RNG seed; the same seed reproduces the same draws bit-for-bit.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Annual risk-free rate used by the per-sample metric set.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

fn default_block_size() -> usize {
    7
}
fn default_horizon_years() -> f64 {
    5.0
}
fn default_iterations() -> usize {
    200
}
fn default_shards() -> usize {
    10
}
fn default_seed() -> u64 {
    42
}
fn default_risk_free_rate() -> f64 {
    0.04
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            horizon_years: default_horizon_years(),
            iterations: default_iterations(),
            shards: default_shards(),
            seed: default_seed(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

impl SanityConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, AnalyticsError> {
        serde_yaml::from_str(yaml).map_err(|e| AnalyticsError::ConfigError(e.to_string()))
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, AnalyticsError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AnalyticsError::ConfigError(e.to_string()))?;
        Self::from_yaml(&contents)
    }
}

/// Fixed benchmark universe the sanity report computes per-benchmark betas
/// against a fixed benchmark universe.
pub const BENCHMARK_TICKERS: &[&str] =
    &["SPY", "QQQ", "VTI", "DIA", "DBC", "DBO", "GLD", "BND", "TLT", "GBTC"];

/// Minimum aligned days required for a beta computation to be reported.
pub const MIN_ALIGNED_DAYS: usize = 50;

/// Selectable portfolio-optimizer objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMetric {
    Correlation,
    Volatility,
    Sharpe,
    Beta,
}

/// Portfolio-optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub metric: OptimizerMetric,

    /// Per-position weight cap; once every weight is either under the cap or
    /// pinned at it, remaining mass is spread equally among capped positions.
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_opt_iterations")]
    pub iterations: usize,

    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

fn default_max_weight() -> f64 {
    1.0
}
fn default_learning_rate() -> f64 {
    0.01
}
fn default_opt_iterations() -> usize {
    1000
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            metric: OptimizerMetric::Volatility,
            max_weight: default_max_weight(),
            learning_rate: default_learning_rate(),
            iterations: default_opt_iterations(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

impl OptimizerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, AnalyticsError> {
        serde_yaml::from_str(yaml).map_err(|e| AnalyticsError::ConfigError(e.to_string()))
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, AnalyticsError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AnalyticsError::ConfigError(e.to_string()))?;
        Self::from_yaml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity_config_has_expected_defaults() {
        let config = SanityConfig::default();
        assert_eq!(config.block_size, 7);
        assert_eq!(config.iterations, 200);
        assert_eq!(config.shards, 10);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn sanity_config_round_trips_through_yaml() {
        let yaml = "block_size: 14\nhorizon_years: 3.0\niterations: 50\nshards: 5\nseed: 7\n";
        let config = SanityConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.block_size, 14);
        assert_eq!(config.shards, 5);
        // risk_free_rate falls back to its default when omitted.
        assert!((config.risk_free_rate - 0.04).abs() < 1e-9);
    }

    #[test]
    fn optimizer_config_has_expected_defaults() {
        let config = OptimizerConfig::default();
        assert!((config.learning_rate - 0.01).abs() < 1e-9);
        assert_eq!(config.iterations, 1000);
        assert!((config.max_weight - 1.0).abs() < 1e-9);
    }
}
