//! Portfolio optimizer: allocate weights across a basket of strategies by
//! projected gradient descent over a chosen objective.
//!
//! Covariance/correlation construction is grounded on and reuses
//! [`crate::advanced::portfolio::PortfolioAnalyzer`] directly rather than
//! reimplementing the matrix math; this module adds the objective functions,
//! their gradients, and the capped-simplex projection PortfolioAnalyzer
//! never needed on its own (it only ever read a portfolio's existing weights, never
//! searched for new ones).

use crate::advanced::portfolio::{PortfolioAnalyzer, PortfolioConfig, Position};
use crate::config::{OptimizerConfig, OptimizerMetric};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::metrics;
use bt_core::DailyReturn;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

const MIN_STRATEGIES: usize = 2;
const MIN_ALIGNED_DAYS: usize = 50;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedAllocation {
    pub weights: HashMap<String, f64>,
    pub expected_return: f64,
    pub expected_volatility: f64,
    pub sharpe: f64,
    pub concentration_hhi: f64,
    pub diversification_ratio: f64,
    pub risk_contributions: HashMap<String, f64>,
}

/// Truncate every series to the length of the shortest, keeping each
/// series' most recent observations (anchored at the common end date).
fn align_to_shortest_tail(series: &HashMap<String, Vec<DailyReturn>>) -> AnalyticsResult<(Vec<String>, Vec<Vec<f64>>)> {
    let min_len = series.values().map(|s| s.len()).min().unwrap_or(0);
    if series.len() < MIN_STRATEGIES || min_len < MIN_ALIGNED_DAYS {
        return Err(AnalyticsError::InsufficientData(format!(
            "optimizer needs at least {MIN_STRATEGIES} strategies with {MIN_ALIGNED_DAYS} aligned days, got {} strategies with {min_len} aligned days",
            series.len()
        )));
    }

    let mut names: Vec<String> = series.keys().cloned().collect();
    names.sort();
    let aligned: Vec<Vec<f64>> = names
        .iter()
        .map(|name| {
            let values = &series[name];
            values[values.len() - min_len..].iter().map(|r| r.value).collect()
        })
        .collect();
    Ok((names, aligned))
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Clamp to `[0, max_weight]`, renormalize to sum to 1, and when clamping
/// pushes weights back over the cap, redistribute the excess across the
/// still-free positions; when every position ends up pinned at the cap (only
/// possible when `n * max_weight <= 1`, i.e. the cap makes full-sum-to-one
/// infeasible), leave every weight at `max_weight` rather than inflating
/// past it — the simplex constraint is dropped, not the cap.
fn project_capped_simplex(weights: &mut [f64], max_weight: f64) {
    let n = weights.len();
    if n == 0 {
        return;
    }
    for w in weights.iter_mut() {
        if *w < 0.0 || !w.is_finite() {
            *w = 0.0;
        }
    }

    for _ in 0..n + 4 {
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            let equal = (1.0 / n as f64).min(max_weight);
            for w in weights.iter_mut() {
                *w = equal;
            }
            return;
        }
        for w in weights.iter_mut() {
            *w /= sum;
        }

        let capped: Vec<usize> = (0..n).filter(|&i| weights[i] >= max_weight).collect();
        if capped.is_empty() {
            return;
        }
        let mut capped_mass = 0.0;
        for &i in &capped {
            weights[i] = max_weight;
            capped_mass += max_weight;
        }

        let free: Vec<usize> = (0..n).filter(|i| !capped.contains(i)).collect();
        let remaining_mass = (1.0 - capped_mass).max(0.0);
        if free.is_empty() {
            // Every position is already pinned at max_weight and there's
            // nowhere left to put `remaining_mass` without breaching the
            // cap; weights already equal max_weight from the loop above.
            let _ = remaining_mass;
            return;
        }

        let free_sum: f64 = free.iter().map(|&i| weights[i]).sum();
        if free_sum <= 0.0 {
            let share = remaining_mass / free.len() as f64;
            for &i in &free {
                weights[i] = share;
            }
        } else {
            for &i in &free {
                weights[i] = weights[i] / free_sum * remaining_mass;
            }
        }
    }
}

/// Gradient of the chosen objective at `w`, in the direction that *reduces*
/// it (the caller negates for objectives that should be maximized).
fn objective_gradient(
    metric: OptimizerMetric,
    w: &DVector<f64>,
    covariance: &DMatrix<f64>,
    correlation: &DMatrix<f64>,
    mean_returns: &DVector<f64>,
    betas: &DVector<f64>,
    risk_free_rate: f64,
) -> DVector<f64> {
    match metric {
        OptimizerMetric::Volatility => (covariance * w) * 2.0,
        OptimizerMetric::Correlation => (correlation * w) * 2.0,
        OptimizerMetric::Beta => {
            let portfolio_beta = w.dot(betas);
            betas * (2.0 * portfolio_beta)
        }
        OptimizerMetric::Sharpe => {
            let variance = (w.transpose() * covariance * w)[(0, 0)].max(1e-12);
            let sigma = variance.sqrt();
            let port_return = w.dot(mean_returns) - risk_free_rate;
            let sigma_w = covariance * w;
            mean_returns.clone() * (1.0 / sigma) - sigma_w * (port_return / (sigma * variance))
        }
    }
}

fn is_maximizing(metric: OptimizerMetric) -> bool {
    matches!(metric, OptimizerMetric::Sharpe)
}

/// Optimize weights across `series` (strategy name -> daily returns) for the
/// configured objective, returning the resulting allocation and its
/// portfolio-level metrics.
pub fn optimize(
    series: &HashMap<String, Vec<DailyReturn>>,
    benchmark: Option<&[DailyReturn]>,
    config: &OptimizerConfig,
) -> AnalyticsResult<OptimizedAllocation> {
    let (names, aligned) = align_to_shortest_tail(series)?;
    let n = names.len();

    if config.max_weight * n as f64 < 1.0 {
        return Err(AnalyticsError::ConfigError(format!(
            "max_weight {} is infeasible for {n} strategies: {n} * max_weight must be >= 1.0",
            config.max_weight
        )));
    }

    let returns_by_name: HashMap<String, Vec<f64>> =
        names.iter().cloned().zip(aligned.iter().cloned()).collect();

    let analyzer = PortfolioAnalyzer::new(PortfolioConfig { min_observations: MIN_ALIGNED_DAYS, ..Default::default() });
    let covariance = analyzer.calculate_covariance_matrix(&returns_by_name)?;
    let correlation = analyzer.calculate_correlation_matrix(&returns_by_name)?;

    let mean_returns = DVector::from_vec(aligned.iter().map(|r| mean(r) * TRADING_DAYS_PER_YEAR).collect());

    let betas = if let Some(benchmark) = benchmark {
        let mut values = Vec::with_capacity(n);
        for name in &names {
            let dated = &series[name];
            let beta = metrics::beta_aligned(dated, benchmark, MIN_ALIGNED_DAYS).unwrap_or(0.0);
            values.push(beta);
        }
        DVector::from_vec(values)
    } else {
        DVector::from_vec(vec![0.0; n])
    };

    if matches!(config.metric, OptimizerMetric::Beta) && benchmark.is_none() {
        return Err(AnalyticsError::ConfigError("beta objective requires a benchmark series".to_string()));
    }

    let mut weights = vec![1.0 / n as f64; n];
    project_capped_simplex(&mut weights, config.max_weight);

    for _ in 0..config.iterations {
        let w = DVector::from_vec(weights.clone());
        let grad = objective_gradient(config.metric, &w, &covariance, &correlation, &mean_returns, &betas, config.risk_free_rate);
        let step = if is_maximizing(config.metric) { config.learning_rate } else { -config.learning_rate };
        for i in 0..n {
            weights[i] += step * grad[i];
        }
        project_capped_simplex(&mut weights, config.max_weight);
    }

    let w = DVector::from_vec(weights.clone());
    let portfolio_variance = (w.transpose() * &covariance * &w)[(0, 0)].max(0.0);
    let expected_volatility = portfolio_variance.sqrt();
    let expected_return = w.dot(&mean_returns);
    let sharpe = if expected_volatility == 0.0 { 0.0 } else { (expected_return - config.risk_free_rate) / expected_volatility };

    let positions: Vec<Position> = names
        .iter()
        .zip(weights.iter())
        .map(|(name, w)| Position { asset_id: name.clone(), value_usd: *w, weight: *w })
        .collect();

    let concentration_hhi = analyzer.calculate_concentration_hhi(&positions)?;

    let asset_volatilities: HashMap<String, f64> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), covariance[(i, i)].max(0.0).sqrt()))
        .collect();
    let diversification_ratio = if expected_volatility == 0.0 {
        1.0
    } else {
        analyzer
            .calculate_diversification_ratio(&positions, &asset_volatilities, expected_volatility)
            .unwrap_or(1.0)
    };

    let risk_contributions: HashMap<String, f64> = analyzer
        .calculate_risk_contribution(&positions, &covariance)
        .map(|contributions| contributions.into_iter().map(|c| (c.asset_id, c.risk_pct)).collect())
        .unwrap_or_default();

    info!(
        strategies = n,
        iterations = config.iterations,
        metric = ?config.metric,
        sharpe,
        concentration_hhi,
        "portfolio optimization complete"
    );

    Ok(OptimizedAllocation {
        weights: names.into_iter().zip(weights).collect(),
        expected_return,
        expected_volatility,
        sharpe,
        concentration_hhi,
        diversification_ratio,
        risk_contributions,
    })
}
