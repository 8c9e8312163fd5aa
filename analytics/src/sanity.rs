//! Sanity report: moving-block bootstrap Monte-Carlo and K-fold shard
//! analyses over a daily-return series, plus per-benchmark betas.
//!
//! The bootstrap resampler uses a seeded `StdRng` resampled repeatedly for
//! `iterations`, drawing contiguous blocks of real historical returns
//! (rather than single i.i.d. normal shocks) so short-range temporal
//! structure survives the resample. The distribution additionally reports a
//! CVaR (p5) figure: the mean of the worst 5% of simulated outcomes.

use crate::config::{SanityConfig, BENCHMARK_TICKERS, MIN_ALIGNED_DAYS};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::metrics;
use bt_core::{DailyReturn, EquityPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

const MIN_RETURN_SERIES_LEN: usize = 50;

/// The metric set computed per bootstrap sample and per K-fold shard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SampleMetrics {
    pub cagr: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub volatility: f64,
}

/// The {p5, p25, p50, p75, p95} quantiles of one metric across the bootstrap
/// distribution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quantiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantileSummary {
    pub cagr: Quantiles,
    pub max_drawdown: Quantiles,
    pub sharpe: Quantiles,
    pub volatility: Quantiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloDistribution {
    pub samples: Vec<SampleMetrics>,
    pub quantiles: QuantileSummary,
    /// Average CAGR across samples at or below the p5 quantile: the
    /// bootstrap's expected-shortfall complement to the quantile report.
    pub cvar_p5: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMetrics {
    pub shard_index: usize,
    pub metrics: SampleMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanityReport {
    pub monte_carlo: MonteCarloDistribution,
    pub k_fold: Vec<ShardMetrics>,
    /// Per-benchmark beta, keyed by ticker, for every benchmark with at
    /// least [`MIN_ALIGNED_DAYS`] aligned days against the strategy.
    pub strategy_betas: HashMap<String, f64>,
}

fn equity_curve_from_returns(returns: &[f64]) -> Vec<EquityPoint> {
    let mut equity = 1.0;
    let base_date = chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let mut curve = Vec::with_capacity(returns.len() + 1);
    curve.push(EquityPoint { date: base_date, equity });
    for (i, r) in returns.iter().enumerate() {
        equity *= 1.0 + r;
        curve.push(EquityPoint { date: base_date + chrono::Duration::days(i as i64 + 1), equity });
    }
    curve
}

fn sample_metrics(returns: &[f64], risk_free_rate: f64) -> SampleMetrics {
    let curve = equity_curve_from_returns(returns);
    let cagr = metrics::cagr(&curve);
    let volatility = metrics::volatility(returns);
    let max_drawdown = metrics::max_drawdown(&curve);
    SampleMetrics { cagr, max_drawdown, sharpe: metrics::sharpe(cagr, volatility, risk_free_rate), volatility }
}

/// Linear-interpolated percentile, matching the convention used throughout
/// this crate's inherited VaR engine (sorted ascending, index by fraction).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

fn quantiles_of(values: &mut [f64]) -> Quantiles {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Quantiles {
        p5: percentile(values, 0.05),
        p25: percentile(values, 0.25),
        p50: percentile(values, 0.50),
        p75: percentile(values, 0.75),
        p95: percentile(values, 0.95),
    }
}

/// Draw one moving-block bootstrap sample of length `target_len` from
/// `returns`, using contiguous blocks of `block_size` drawn uniformly with
/// replacement.
fn draw_bootstrap_sample(returns: &[f64], block_size: usize, target_len: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut sample = Vec::with_capacity(target_len + block_size);
    let max_start = returns.len().saturating_sub(block_size);
    while sample.len() < target_len {
        let start = rng.gen_range(0..=max_start);
        sample.extend_from_slice(&returns[start..start + block_size]);
    }
    sample.truncate(target_len);
    sample
}

/// Moving-block bootstrap Monte-Carlo over `returns`.
pub fn monte_carlo(returns: &[f64], config: &SanityConfig) -> AnalyticsResult<MonteCarloDistribution> {
    if returns.len() < MIN_RETURN_SERIES_LEN {
        return Err(AnalyticsError::InsufficientData(format!(
            "sanity report needs at least {MIN_RETURN_SERIES_LEN} daily returns, got {}",
            returns.len()
        )));
    }
    if config.block_size == 0 || config.block_size > returns.len() {
        return Err(AnalyticsError::ConfigError(format!(
            "block_size {} must be in 1..={}",
            config.block_size,
            returns.len()
        )));
    }

    let target_len = (252.0 * config.horizon_years).ceil() as usize;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut samples = Vec::with_capacity(config.iterations);
    for _ in 0..config.iterations {
        let drawn = draw_bootstrap_sample(returns, config.block_size, target_len, &mut rng);
        samples.push(sample_metrics(&drawn, config.risk_free_rate));
    }

    let mut cagrs: Vec<f64> = samples.iter().map(|s| s.cagr).collect();
    let mut dds: Vec<f64> = samples.iter().map(|s| s.max_drawdown).collect();
    let mut sharpes: Vec<f64> = samples.iter().map(|s| s.sharpe).collect();
    let mut vols: Vec<f64> = samples.iter().map(|s| s.volatility).collect();

    let cagr_p5 = percentile(&{
        let mut sorted = cagrs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted
    }, 0.05);
    let tail: Vec<f64> = cagrs.iter().copied().filter(|c| *c <= cagr_p5).collect();
    let cvar_p5 = if tail.is_empty() { cagr_p5 } else { tail.iter().sum::<f64>() / tail.len() as f64 };

    let quantiles = QuantileSummary {
        cagr: quantiles_of(&mut cagrs),
        max_drawdown: quantiles_of(&mut dds),
        sharpe: quantiles_of(&mut sharpes),
        volatility: quantiles_of(&mut vols),
    };

    Ok(MonteCarloDistribution { samples, quantiles, cvar_p5 })
}

/// Split `returns` into `shards` contiguous equal-size shards and compute the
/// same metric set over each, surfacing regime instability.
pub fn k_fold(returns: &[f64], config: &SanityConfig) -> AnalyticsResult<Vec<ShardMetrics>> {
    if returns.len() < MIN_RETURN_SERIES_LEN {
        return Err(AnalyticsError::InsufficientData(format!(
            "sanity report needs at least {MIN_RETURN_SERIES_LEN} daily returns, got {}",
            returns.len()
        )));
    }
    if config.shards == 0 || config.shards > returns.len() {
        return Err(AnalyticsError::ConfigError(format!(
            "shards {} must be in 1..={}",
            config.shards,
            returns.len()
        )));
    }

    let shard_len = returns.len() / config.shards;
    let mut shards = Vec::with_capacity(config.shards);
    for i in 0..config.shards {
        let start = i * shard_len;
        let end = if i == config.shards - 1 { returns.len() } else { start + shard_len };
        shards.push(ShardMetrics { shard_index: i, metrics: sample_metrics(&returns[start..end], config.risk_free_rate) });
    }
    Ok(shards)
}

/// Per-benchmark betas over the fixed benchmark universe, keeping
/// only benchmarks with at least [`MIN_ALIGNED_DAYS`] aligned days.
pub fn strategy_betas(
    strategy_returns: &[DailyReturn],
    benchmark_series: &HashMap<String, Vec<DailyReturn>>,
) -> HashMap<String, f64> {
    BENCHMARK_TICKERS
        .iter()
        .filter_map(|ticker| {
            let benchmark = benchmark_series.get(*ticker)?;
            let beta = metrics::beta_aligned(strategy_returns, benchmark, MIN_ALIGNED_DAYS).ok()?;
            Some((ticker.to_string(), beta))
        })
        .collect()
}

/// Build the full sanity report for one strategy's daily returns.
pub fn compute_sanity_report(
    strategy_returns: &[DailyReturn],
    benchmark_series: &HashMap<String, Vec<DailyReturn>>,
    config: &SanityConfig,
) -> AnalyticsResult<SanityReport> {
    let values: Vec<f64> = strategy_returns.iter().map(|r| r.value).collect();
    let report = SanityReport {
        monte_carlo: monte_carlo(&values, config)?,
        k_fold: k_fold(&values, config)?,
        strategy_betas: strategy_betas(strategy_returns, benchmark_series),
    };
    info!(
        days = values.len(),
        iterations = config.iterations,
        shards = config.shards,
        betas = report.strategy_betas.len(),
        "sanity report complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn synthetic_returns(n: usize) -> Vec<f64> {
        (0..n).map(|i| 0.0005 * ((i % 11) as f64 - 5.0)).collect()
    }

    fn dated(returns: &[f64]) -> Vec<DailyReturn> {
        let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        returns.iter().enumerate().map(|(i, v)| DailyReturn { date: base + chrono::Duration::days(i as i64), value: *v }).collect()
    }

    #[test]
    fn monte_carlo_is_deterministic_given_a_fixed_seed() {
        let returns = synthetic_returns(300);
        let config = SanityConfig { iterations: 50, horizon_years: 1.0, ..Default::default() };
        let a = monte_carlo(&returns, &config).unwrap();
        let b = monte_carlo(&returns, &config).unwrap();
        assert_eq!(a.quantiles.cagr.p50, b.quantiles.cagr.p50);
        assert_eq!(a.samples.len(), b.samples.len());
    }

    #[test]
    fn monte_carlo_rejects_short_series() {
        let returns = synthetic_returns(10);
        let err = monte_carlo(&returns, &SanityConfig::default()).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    #[test]
    fn k_fold_splits_into_the_configured_shard_count() {
        let returns = synthetic_returns(300);
        let config = SanityConfig { shards: 10, ..Default::default() };
        let shards = k_fold(&returns, &config).unwrap();
        assert_eq!(shards.len(), 10);
    }

    #[test]
    fn strategy_betas_only_includes_benchmarks_with_enough_aligned_days() {
        let strategy = dated(&synthetic_returns(120));
        let mut benchmarks = HashMap::new();
        benchmarks.insert("SPY".to_string(), dated(&synthetic_returns(120)));
        benchmarks.insert("QQQ".to_string(), dated(&synthetic_returns(10)));

        let betas = strategy_betas(&strategy, &benchmarks);
        assert!(betas.contains_key("SPY"));
        assert!(!betas.contains_key("QQQ"));
    }
}
