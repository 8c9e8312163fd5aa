//! Pure, deterministic indicator functions over a single ticker's price
//! history. Grounded on the rolling-state indicator objects this crate's
//! signal framework used to expose (`SimpleMovingAverage`, `RelativeStrengthIndex`,
//! ...), generalized here into stateless functions over a slice so the same
//! indicator can be replayed identically at any historical date without
//! carrying mutable state across days.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Maximum lookback, in trading days, that any indicator call in `params`
/// requires. Used by the evaluator to compute the warm-up prefix.
pub fn lookback(name: &str, params: &BTreeMap<String, f64>) -> usize {
    match name {
        "PRICE" => 0,
        _ => params.get("n").copied().unwrap_or(14.0) as usize,
    }
}

/// Evaluate indicator `name` against `prices`, where `prices` is ordered
/// ascending and its last element is the reading as of the evaluation date.
pub fn eval(name: &str, prices: &[f64], params: &BTreeMap<String, f64>) -> CoreResult<f64> {
    match name {
        "PRICE" => prices.last().copied().ok_or_else(|| no_data(name)),
        "SMA" => sma(prices, n(params)),
        "EMA" => ema(prices, n(params)),
        "RSI" => rsi(prices, n(params)),
        "MOM" => momentum(prices, n(params)),
        "ROC" => rate_of_change(prices, n(params)),
        "STDEV" => stdev(prices, n(params)),
        "MAX_DD" => max_drawdown(prices, n(params)),
        "CUM_RET" => cumulative_return(prices, n(params)),
        "MA_RETURN" => moving_average_return(prices, n(params)),
        "INV_VOL" => inverse_volatility(prices, n(params)),
        other => Err(CoreError::UnknownIndicator(other.to_string())),
    }
    .map(|v| v.ok_or_else(|| insufficient(name, n(params), prices.len())))
    .and_then(|r| r)
}

fn n(params: &BTreeMap<String, f64>) -> usize {
    params.get("n").copied().unwrap_or(14.0) as usize
}

fn no_data(name: &str) -> CoreError {
    CoreError::EvaluatorError { node_id: String::new(), message: format!("{name}: no price data") }
}

fn insufficient(name: &str, needed: usize, have: usize) -> CoreError {
    CoreError::DataInsufficient { ticker: name.to_string(), needed, have }
}

fn window(prices: &[f64], n: usize) -> Option<&[f64]> {
    if n == 0 || prices.len() < n {
        None
    } else {
        Some(&prices[prices.len() - n..])
    }
}

fn returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

fn sma(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n).map(|w| w.iter().sum::<f64>() / w.len() as f64))
}

fn ema(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n).map(|w| {
        let alpha = 2.0 / (n as f64 + 1.0);
        let mut value = w[0];
        for &price in &w[1..] {
            value = alpha * price + (1.0 - alpha) * value;
        }
        value
    }))
}

fn rsi(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| {
        let mut gains = 0.0;
        let mut losses = 0.0;
        for pair in w.windows(2) {
            let delta = pair[1] - pair[0];
            if delta >= 0.0 {
                gains += delta;
            } else {
                losses -= delta;
            }
        }
        let avg_gain = gains / n as f64;
        let avg_loss = losses / n as f64;
        if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }))
}

fn momentum(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| w[w.len() - 1] - w[0]))
}

fn rate_of_change(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| (w[w.len() - 1] - w[0]) / w[0]))
}

fn stdev(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| {
        let r = returns(w);
        let mean = r.iter().sum::<f64>() / r.len() as f64;
        let variance = r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (r.len() as f64 - 1.0).max(1.0);
        variance.sqrt()
    }))
}

fn max_drawdown(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n).map(|w| {
        let mut peak = w[0];
        let mut worst = 0.0_f64;
        for &p in w {
            peak = peak.max(p);
            worst = worst.max((peak - p) / peak);
        }
        worst
    }))
}

fn cumulative_return(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| (w[w.len() - 1] / w[0]) - 1.0))
}

fn moving_average_return(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    Ok(window(prices, n + 1).map(|w| {
        let r = returns(w);
        r.iter().sum::<f64>() / r.len() as f64
    }))
}

fn inverse_volatility(prices: &[f64], n: usize) -> Result<Option<f64>, CoreError> {
    stdev(prices, n).map(|maybe_sigma| maybe_sigma.map(|sigma| if sigma > 0.0 { 1.0 / sigma } else { 0.0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n: f64) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        m.insert("n".to_string(), n);
        m
    }

    #[test]
    fn sma_of_constant_series_equals_the_constant() {
        let prices = vec![10.0; 20];
        let value = eval("SMA", &prices, &params(5.0)).unwrap();
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_of_monotonically_rising_series_is_100() {
        let prices: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let value = eval("RSI", &prices, &params(14.0)).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn insufficient_history_is_an_error() {
        let prices = vec![1.0, 2.0, 3.0];
        let err = eval("SMA", &prices, &params(14.0)).unwrap_err();
        assert!(matches!(err, CoreError::DataInsufficient { .. }));
    }

    #[test]
    fn unknown_indicator_is_a_config_error() {
        let prices = vec![1.0, 2.0, 3.0];
        let err = eval("NOPE", &prices, &params(5.0)).unwrap_err();
        assert!(matches!(err, CoreError::UnknownIndicator(_)));
    }

    #[test]
    fn max_drawdown_tracks_the_trough_below_the_running_peak() {
        let prices = vec![10.0, 12.0, 6.0, 8.0];
        let value = eval("MAX_DD", &prices, &params(4.0)).unwrap();
        assert!((value - 0.5).abs() < 1e-9);
    }
}
