//! Aggregate risk/return metrics over an equity curve and daily-return
//! series.
//!
//! Differs from a fixed-risk-free-rate, positionally-aligned performance
//! calculator in three ways: the risk-free rate is a parameter rather than a
//! constant, beta supports date-aligned (not just positional) pairing via
//! [`beta_aligned`], and CAGR is derived from start/end equity rather than
//! compounding the mean daily return.

use crate::error::{AnalyticsError, AnalyticsResult};
use bt_core::{BacktestResult, DailyReturn, EquityPoint, Metrics};
use std::collections::HashMap;
use tracing::debug;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DEFAULT_RISK_FREE_RATE: f64 = 0.04;

/// CAGR from the first and last equity points: `(end/start)^(252/N) - 1`.
pub fn cagr(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }
    let start = equity_curve.first().unwrap().equity;
    let end = equity_curve.last().unwrap().equity;
    let n = (equity_curve.len() - 1) as f64;
    if start <= 0.0 || n <= 0.0 {
        return 0.0;
    }
    (end / start).powf(TRADING_DAYS_PER_YEAR / n) - 1.0
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Sample standard deviation (N-1 denominator).
fn stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let variance = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

/// Annualized volatility: `stdev(returns) * sqrt(252)`.
pub fn volatility(returns: &[f64]) -> f64 {
    stdev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Max drawdown as a positive magnitude: `max_t (peak - equity) / peak`.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for point in equity_curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.max((peak - point.equity) / peak);
        }
    }
    worst
}

/// `(CAGR - r_f) / volatility`.
pub fn sharpe(cagr: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility == 0.0 {
        return 0.0;
    }
    (cagr - risk_free_rate) / volatility
}

/// `(mean(returns) * 252 - r_f) / (stdev(returns | returns < 0) * sqrt(252))`.
pub fn sortino(returns: &[f64], risk_free_rate: f64) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_vol = stdev(&downside) * TRADING_DAYS_PER_YEAR.sqrt();
    if downside_vol == 0.0 {
        return 0.0;
    }
    (mean(returns) * TRADING_DAYS_PER_YEAR - risk_free_rate) / downside_vol
}

/// `CAGR / max_drawdown`.
pub fn calmar(cagr: f64, max_drawdown: f64) -> f64 {
    if max_drawdown == 0.0 {
        return 0.0;
    }
    cagr / max_drawdown
}

pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

/// Beta between two dated return series, aligned by date intersection (not
/// position). Returns [`AnalyticsError::InsufficientData`]
/// below `min_aligned_days` shared dates.
pub fn beta_aligned(
    strategy: &[DailyReturn],
    benchmark: &[DailyReturn],
    min_aligned_days: usize,
) -> AnalyticsResult<f64> {
    let benchmark_by_date: HashMap<_, _> = benchmark.iter().map(|r| (r.date, r.value)).collect();
    let mut strategy_aligned = Vec::new();
    let mut benchmark_aligned = Vec::new();
    for point in strategy {
        if let Some(b) = benchmark_by_date.get(&point.date) {
            strategy_aligned.push(point.value);
            benchmark_aligned.push(*b);
        }
    }

    if strategy_aligned.len() < min_aligned_days {
        return Err(AnalyticsError::InsufficientData(format!(
            "beta alignment needs {min_aligned_days} shared dates, found {}",
            strategy_aligned.len()
        )));
    }

    let strategy_mean = mean(&strategy_aligned);
    let benchmark_mean = mean(&benchmark_aligned);
    let n = strategy_aligned.len() as f64;

    let covariance = strategy_aligned
        .iter()
        .zip(benchmark_aligned.iter())
        .map(|(s, b)| (s - strategy_mean) * (b - benchmark_mean))
        .sum::<f64>()
        / (n - 1.0);
    let benchmark_variance = benchmark_aligned.iter().map(|b| (b - benchmark_mean).powi(2)).sum::<f64>() / (n - 1.0);

    if benchmark_variance == 0.0 {
        return Err(AnalyticsError::NumericalError("benchmark variance is zero".to_string()));
    }
    Ok(covariance / benchmark_variance)
}

/// `(CAGR - r_f) / beta(SPY)`.
pub fn treynor(cagr: f64, risk_free_rate: f64, beta_spy: f64) -> Option<f64> {
    if beta_spy == 0.0 {
        None
    } else {
        Some((cagr - risk_free_rate) / beta_spy)
    }
}

/// Compute the full [`Metrics`] set for a completed backtest. `benchmark`,
/// if given, is SPY's dated daily returns over (at least) the backtest's
/// range, used for beta and Treynor.
pub fn compute_metrics(result: &BacktestResult, risk_free_rate: f64, benchmark: Option<&[DailyReturn]>) -> Metrics {
    let returns: Vec<f64> = result.daily_returns.iter().map(|r| r.value).collect();
    let c = cagr(&result.equity_curve);
    let vol = volatility(&returns);
    let dd = max_drawdown(&result.equity_curve);

    let beta_spy = benchmark.and_then(|b| beta_aligned(&result.daily_returns, b, crate::config::MIN_ALIGNED_DAYS).ok());

    debug!(days = returns.len(), cagr = c, volatility = vol, "computed backtest metrics");

    Metrics {
        cagr: c,
        volatility: vol,
        max_drawdown: dd,
        sharpe: sharpe(c, vol, risk_free_rate),
        sortino: sortino(&returns, risk_free_rate),
        calmar: calmar(c, dd),
        treynor: beta_spy.and_then(|b| treynor(c, risk_free_rate, b)),
        beta_spy,
        win_rate: win_rate(&returns),
        avg_turnover: result.avg_turnover,
        avg_holdings: result.avg_holdings,
    }
}

pub const DEFAULT_RF: f64 = DEFAULT_RISK_FREE_RATE;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn date(d: u32) -> chrono::NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(d as i64)
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values.iter().enumerate().map(|(i, v)| EquityPoint { date: date(i as u32), equity: *v }).collect()
    }

    #[test]
    fn cagr_of_flat_curve_is_zero() {
        let c = curve(&[1.0; 300]);
        assert_abs_diff_eq!(cagr(&c), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn max_drawdown_finds_the_deepest_trough() {
        let c = curve(&[1.0, 1.2, 0.6, 0.9]);
        let dd = max_drawdown(&c);
        assert_abs_diff_eq!(dd, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn beta_of_identical_series_is_one() {
        let series: Vec<DailyReturn> =
            (0..60).map(|i| DailyReturn { date: date(i), value: 0.001 * (i as f64 % 5.0 - 2.0) }).collect();
        let beta = beta_aligned(&series, &series, 50).unwrap();
        assert_abs_diff_eq!(beta, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn beta_requires_minimum_aligned_days() {
        let short: Vec<DailyReturn> = (0..10).map(|i| DailyReturn { date: date(i), value: 0.01 }).collect();
        let err = beta_aligned(&short, &short, 50).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    #[test]
    fn beta_aligns_by_date_not_position() {
        // Benchmark is missing every other date; only the intersection counts.
        let strategy: Vec<DailyReturn> =
            (0..120).map(|i| DailyReturn { date: date(i), value: 0.0005 * (i as f64 % 3.0 - 1.0) }).collect();
        let benchmark: Vec<DailyReturn> = strategy.iter().step_by(2).cloned().collect();
        let beta = beta_aligned(&strategy, &benchmark, 50).unwrap();
        assert!(beta.is_finite());
    }

    #[test]
    fn win_rate_counts_strictly_positive_days() {
        let returns = [0.01, -0.01, 0.0, 0.02, -0.03];
        assert!((win_rate(&returns) - 0.4).abs() < 1e-9);
    }
}
