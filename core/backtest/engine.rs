//! Day-loop backtest evaluator: walks a [`CompressedTree`] over historical
//! data and rolls an equity curve forward one trading day at a time.

use crate::error::{CoreError, CoreResult};
use crate::indicators;
use crate::price::PriceCache;
use crate::compressor::CompressedTree;
use crate::types::{
    Allocation, BacktestConfig, BacktestResult, CompressionStats, Condition, ConditionOperand,
    DailyReturn, EquityPoint, EvaluationMode, Node, PostProcess, Slots, Ticker, Weighting,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

const MIN_EVALUABLE_DAYS: usize = 50;

/// Per-run scratch state: aligned price histories and the branch-history
/// accumulator. Owned exclusively by one run; never shared across requests.
struct RunData {
    dates: Vec<NaiveDate>,
    adj_close: HashMap<Ticker, Vec<f64>>,
    open: HashMap<Ticker, Vec<f64>>,
}

pub struct BacktestEngine {
    price_cache: Arc<PriceCache>,
}

impl BacktestEngine {
    pub fn new(price_cache: Arc<PriceCache>) -> Self {
        Self { price_cache }
    }

    /// Run a backtest of `compressed` from its earliest evaluable day (after
    /// indicator warm-up) through the latest date shared by all required
    /// tickers. `benchmark_ticker`, if given, is normalized to the same range
    /// and returned alongside the strategy's equity curve for comparison.
    pub fn run(
        &self,
        compressed: &CompressedTree,
        config: &BacktestConfig,
        benchmark_ticker: Option<&str>,
    ) -> CoreResult<BacktestResult> {
        self.run_cancellable(compressed, config, benchmark_ticker, None)
    }

    /// Same as [`BacktestEngine::run`], but checks `cancel` at the start of
    /// every trading day and bails out with [`CoreError::Cancelled`] as soon
    /// as it's observed set. The evaluator itself stays synchronous; this is
    /// the cooperative checkpoint an async caller flips the flag around.
    pub fn run_cancellable(
        &self,
        compressed: &CompressedTree,
        config: &BacktestConfig,
        benchmark_ticker: Option<&str>,
        cancel: Option<&AtomicBool>,
    ) -> CoreResult<BacktestResult> {
        let required: HashSet<Ticker> = compressed
            .ticker_locations
            .get(compressed.root.id())
            .cloned()
            .unwrap_or_default();

        if required.is_empty() {
            return Err(CoreError::StructuralError("tree has no active tickers".to_string()));
        }

        let run_data = self.load_run_data(&required)?;
        let warmup = max_lookback(&compressed.root);

        if run_data.dates.len() < warmup + MIN_EVALUABLE_DAYS {
            return Err(CoreError::DataInsufficient {
                ticker: required.iter().next().cloned().unwrap_or_default(),
                needed: warmup + MIN_EVALUABLE_DAYS,
                have: run_data.dates.len(),
            });
        }

        info!(
            start = %run_data.dates[warmup],
            end = %run_data.dates[run_data.dates.len() - 1],
            tickers = required.len(),
            "starting backtest run"
        );

        let mut equity = 1.0_f64;
        let mut equity_curve = Vec::with_capacity(run_data.dates.len() - warmup);
        let mut daily_returns = Vec::with_capacity(run_data.dates.len() - warmup - 1);
        let mut allocations = HashMap::new();
        let mut branch_history: HashMap<String, Vec<f64>> = HashMap::new();
        let mut previous_allocation: Allocation = Allocation::new();

        let mut turnover_sum = 0.0;
        let mut holdings_sum = 0.0;
        let mut day_count = 0usize;

        for idx in warmup..run_data.dates.len() {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(CoreError::Cancelled);
                }
            }

            let date = run_data.dates[idx];

            let allocation = eval_node(
                &compressed.root,
                idx,
                &run_data.adj_close,
                &compressed.ticker_locations,
                &mut branch_history,
                1.0,
            )?;

            let total_weight: f64 = allocation.values().sum();
            if total_weight > 1.0 + 1e-6 {
                return Err(CoreError::EvaluatorError {
                    node_id: compressed.root.id().to_string(),
                    message: format!("allocation weights sum to {total_weight}, exceeding 1"),
                });
            }
            for (ticker, weight) in &allocation {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(CoreError::EvaluatorError {
                        node_id: compressed.root.id().to_string(),
                        message: format!("non-finite or negative weight for {ticker}: {weight}"),
                    });
                }
            }

            let turnover = half_l1_distance(&previous_allocation, &allocation);
            let cost = turnover * config.cost_bps * 1e-4;

            let day_return = match config.mode {
                EvaluationMode::CC => {
                    portfolio_return(&allocation, &run_data.adj_close, idx, idx.saturating_sub(1))
                }
                EvaluationMode::OC => {
                    let prior_leg =
                        portfolio_return(&previous_allocation, &run_data.open, idx, idx.saturating_sub(1).max(0));
                    let today_leg = open_to_close_return(&allocation, &run_data, idx);
                    prior_leg + today_leg
                }
            };

            if idx > warmup {
                equity *= (1.0 + day_return) * (1.0 - cost);
                daily_returns.push(DailyReturn { date, value: day_return });
            } else {
                // First evaluable day: cost of establishing the initial position
                // is charged, but there is no prior day's return to realize.
                equity *= 1.0 - cost;
            }

            equity_curve.push(EquityPoint { date, equity });
            allocations.insert(date, allocation.clone());

            turnover_sum += turnover;
            holdings_sum += allocation.len() as f64;
            day_count += 1;

            previous_allocation = allocation;
        }

        let avg_turnover = turnover_sum / day_count as f64;
        let avg_holdings = holdings_sum / day_count as f64;

        let benchmark_curve = benchmark_ticker
            .map(|ticker| self.normalized_benchmark_curve(ticker, &run_data, warmup))
            .transpose()?;

        info!(
            days = day_count,
            nodes_removed = compressed.stats.nodes_removed,
            "backtest complete"
        );

        Ok(BacktestResult {
            equity_curve,
            benchmark_curve,
            daily_returns,
            allocations,
            metrics: crate::types::Metrics::default(),
            avg_turnover,
            avg_holdings,
            compression_stats: compressed.stats,
        })
    }

    fn load_run_data(&self, required: &HashSet<Ticker>) -> CoreResult<RunData> {
        let mut series_by_ticker = HashMap::new();
        for ticker in required {
            let series = self.price_cache.get(ticker)?;
            series_by_ticker.insert(ticker.clone(), series);
        }

        // Calendar intersection: only dates present for every required ticker.
        let mut common: Option<HashSet<NaiveDate>> = None;
        for series in series_by_ticker.values() {
            let dates: HashSet<NaiveDate> = series.bars.iter().map(|b| b.date).collect();
            common = Some(match common {
                Some(existing) => existing.intersection(&dates).copied().collect(),
                None => dates,
            });
        }
        let mut dates: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();
        dates.sort();

        let mut adj_close = HashMap::new();
        let mut open = HashMap::new();
        for (ticker, series) in &series_by_ticker {
            let mut closes = Vec::with_capacity(dates.len());
            let mut opens = Vec::with_capacity(dates.len());
            for date in &dates {
                let bar = series.bar_on(*date).ok_or_else(|| CoreError::DataMissing(ticker.clone()))?;
                closes.push(bar.adj_close);
                opens.push(bar.open);
            }
            adj_close.insert(ticker.clone(), closes);
            open.insert(ticker.clone(), opens);
        }

        Ok(RunData { dates, adj_close, open })
    }

    fn normalized_benchmark_curve(
        &self,
        ticker: &str,
        run_data: &RunData,
        warmup: usize,
    ) -> CoreResult<Vec<EquityPoint>> {
        let series = self.price_cache.get(ticker)?;
        let mut curve = Vec::with_capacity(run_data.dates.len() - warmup);
        let base = series
            .bar_on(run_data.dates[warmup])
            .ok_or_else(|| CoreError::DataMissing(ticker.to_string()))?
            .adj_close;
        for date in &run_data.dates[warmup..] {
            let bar = series.bar_on(*date).ok_or_else(|| CoreError::DataMissing(ticker.to_string()))?;
            curve.push(EquityPoint { date: *date, equity: bar.adj_close / base });
        }
        Ok(curve)
    }
}

fn open_to_close_return(allocation: &Allocation, run_data: &RunData, idx: usize) -> f64 {
    allocation
        .iter()
        .map(|(ticker, weight)| {
            let closes = &run_data.adj_close[ticker];
            let opens = &run_data.open[ticker];
            weight * (closes[idx] / opens[idx] - 1.0)
        })
        .sum()
}

fn portfolio_return(allocation: &Allocation, series: &HashMap<Ticker, Vec<f64>>, idx: usize, prev_idx: usize) -> f64 {
    if idx == prev_idx {
        return 0.0;
    }
    allocation
        .iter()
        .map(|(ticker, weight)| {
            let values = &series[ticker];
            weight * (values[idx] / values[prev_idx] - 1.0)
        })
        .sum()
}

fn half_l1_distance(a: &Allocation, b: &Allocation) -> f64 {
    let mut tickers: HashSet<&Ticker> = a.keys().collect();
    tickers.extend(b.keys());
    tickers.iter().map(|t| (a.get(*t).copied().unwrap_or(0.0) - b.get(*t).copied().unwrap_or(0.0)).abs()).sum::<f64>() / 2.0
}

/// The maximum lookback any indicator reachable from `node` requires; the
/// evaluator's warm-up prefix.
fn max_lookback(node: &Node) -> usize {
    match node {
        Node::Position { weighting, .. } => weighting_lookback(weighting),
        Node::Basic { weighting, children, .. } => {
            children.next.iter().map(max_lookback).max().unwrap_or(0).max(weighting_lookback(weighting))
        }
        Node::Indicator { conditions, children, .. } => {
            let condition_max = conditions
                .iter()
                .map(|c| {
                    let lhs = indicators::lookback(&c.indicator, &c.params);
                    let rhs = match &c.rhs {
                        ConditionOperand::Indicator { name, params, .. } => indicators::lookback(name, params),
                        _ => 0,
                    };
                    lhs.max(rhs)
                })
                .max()
                .unwrap_or(0);
            let child_max = children.then.as_deref().map(max_lookback).unwrap_or(0)
                .max(children.r#else.as_deref().map(max_lookback).unwrap_or(0));
            condition_max.max(child_max)
        }
        Node::Function { post_process, children, .. } => {
            let pp_lookback = match post_process {
                PostProcess::TopKByIndicator { indicator, params, .. } => indicators::lookback(indicator, params),
                PostProcess::FilterBelowThreshold { indicator, params, .. } => indicators::lookback(indicator, params),
                PostProcess::RebalanceTrigger { .. } => 0,
            };
            children.next.iter().map(max_lookback).max().unwrap_or(0).max(pp_lookback)
        }
    }
}

fn weighting_lookback(weighting: &Weighting) -> usize {
    match weighting {
        Weighting::InverseVolatility { lookback } => *lookback,
        _ => 0,
    }
}

/// Evaluate `node` at `idx` under `upstream_weight`, returning the resulting
/// per-ticker allocation. Exhaustive match over every node kind, as this
/// system's design notes require for dynamic dispatch over tagged variants.
fn eval_node(
    node: &Node,
    idx: usize,
    histories: &HashMap<Ticker, Vec<f64>>,
    ticker_locations: &HashMap<String, HashSet<Ticker>>,
    branch_history: &mut HashMap<String, Vec<f64>>,
    upstream_weight: f64,
) -> CoreResult<Allocation> {
    match node {
        Node::Position { tickers, weighting, .. } => {
            let targets = weight_targets(weighting, tickers, histories, idx, node.id())?;
            Ok(targets.into_iter().map(|(ticker, w)| (ticker, w * upstream_weight)).collect())
        }
        Node::Basic { weighting, children, .. } => {
            let child_weights = child_weighting(weighting, &children.next, ticker_locations, histories, idx, node.id())?;
            let mut combined = Allocation::new();
            for (child, weight) in children.next.iter().zip(child_weights) {
                let child_alloc = eval_node(child, idx, histories, ticker_locations, branch_history, upstream_weight * weight)?;
                for (ticker, w) in child_alloc {
                    *combined.entry(ticker).or_insert(0.0) += w;
                }
            }
            Ok(combined)
        }
        Node::Indicator { conditions, children, id } => {
            let satisfied = evaluate_conditions(conditions, histories, idx, branch_history)?;
            if let Some(first) = conditions.first() {
                let lhs = indicators::eval(&first.indicator, slice_for(histories, &first.ticker, idx)?, &first.params)?;
                branch_history.entry(id.clone()).or_default().push(lhs);
            }
            let branch = if satisfied { children.then.as_deref() } else { children.r#else.as_deref() };
            match branch {
                Some(child) => eval_node(child, idx, histories, ticker_locations, branch_history, upstream_weight),
                None => Ok(Allocation::new()),
            }
        }
        Node::Function { post_process, children, .. } => {
            let child = &children.next[0];
            let child_alloc = eval_node(child, idx, histories, ticker_locations, branch_history, upstream_weight)?;
            apply_post_process(post_process, child_alloc, histories, idx)
        }
    }
}

fn slice_for<'a>(histories: &'a HashMap<Ticker, Vec<f64>>, ticker: &str, idx: usize) -> CoreResult<&'a [f64]> {
    histories
        .get(ticker)
        .map(|v| &v[..=idx])
        .ok_or_else(|| CoreError::DataMissing(ticker.to_string()))
}

fn evaluate_conditions(
    conditions: &[Condition],
    histories: &HashMap<Ticker, Vec<f64>>,
    idx: usize,
    branch_history: &HashMap<String, Vec<f64>>,
) -> CoreResult<bool> {
    let mut plain_and = true;
    let mut or_groups: BTreeMap<u32, bool> = BTreeMap::new();

    for condition in conditions {
        let lhs = indicators::eval(&condition.indicator, slice_for(histories, &condition.ticker, idx)?, &condition.params)?;
        let rhs = match &condition.rhs {
            ConditionOperand::Literal { value } => *value,
            ConditionOperand::Indicator { name, ticker, params } => {
                indicators::eval(name, slice_for(histories, ticker, idx)?, params)?
            }
            ConditionOperand::Branch { slot } => {
                // Resolved against the prior day's accumulated reading for the
                // named gate, per this system's by-name branch-history model.
                branch_history
                    .get(slot)
                    .and_then(|history| history.last())
                    .copied()
                    .ok_or_else(|| CoreError::EvaluatorError {
                        node_id: slot.clone(),
                        message: "branch reference has no accumulated history yet".to_string(),
                    })?
            }
        };
        let result = condition.comparator.apply(lhs, rhs);

        match condition.or_group {
            Some(group) => {
                let entry = or_groups.entry(group).or_insert(false);
                *entry = *entry || result;
            }
            None => plain_and = plain_and && result,
        }
    }

    Ok(plain_and && or_groups.values().all(|v| *v))
}

fn weight_targets(
    weighting: &Weighting,
    tickers: &[Ticker],
    histories: &HashMap<Ticker, Vec<f64>>,
    idx: usize,
    node_id: &str,
) -> CoreResult<Vec<(Ticker, f64)>> {
    match weighting {
        Weighting::Equal => {
            let w = 1.0 / tickers.len() as f64;
            Ok(tickers.iter().map(|t| (t.clone(), w)).collect())
        }
        Weighting::InverseVolatility { lookback } => {
            let mut inv_vols = Vec::with_capacity(tickers.len());
            for ticker in tickers {
                let history = slice_for(histories, ticker, idx)?;
                let params = std::iter::once(("n".to_string(), *lookback as f64)).collect();
                let inv_vol = indicators::eval("INV_VOL", history, &params)?;
                inv_vols.push(inv_vol);
            }
            let total: f64 = inv_vols.iter().sum();
            if total <= 0.0 {
                let w = 1.0 / tickers.len() as f64;
                return Ok(tickers.iter().map(|t| (t.clone(), w)).collect());
            }
            Ok(tickers.iter().cloned().zip(inv_vols.into_iter().map(|v| v / total)).collect())
        }
        Weighting::MarketCap => Err(CoreError::ConfigError(format!(
            "node {node_id}: market-cap weighting requires a market-cap data source, which is out of scope"
        ))),
        Weighting::UserSpecified { weights } => {
            let total: f64 = tickers.iter().filter_map(|t| weights.get(t)).sum();
            if total <= 0.0 {
                return Err(CoreError::ConfigError(format!("node {node_id}: user-specified weights sum to zero")));
            }
            Ok(tickers.iter().map(|t| (t.clone(), weights.get(t).copied().unwrap_or(0.0) / total)).collect())
        }
    }
}

fn child_weighting(
    weighting: &Weighting,
    children: &[Node],
    ticker_locations: &HashMap<String, HashSet<Ticker>>,
    histories: &HashMap<Ticker, Vec<f64>>,
    idx: usize,
    node_id: &str,
) -> CoreResult<Vec<f64>> {
    match weighting {
        Weighting::Equal => Ok(vec![1.0 / children.len() as f64; children.len()]),
        Weighting::InverseVolatility { lookback } => {
            let mut inv_vols = Vec::with_capacity(children.len());
            for child in children {
                let empty = HashSet::new();
                let reachable = ticker_locations.get(child.id()).unwrap_or(&empty);
                let sigma = blended_volatility(reachable, histories, idx, *lookback);
                inv_vols.push(if sigma > 0.0 { 1.0 / sigma } else { 0.0 });
            }
            let total: f64 = inv_vols.iter().sum();
            if total <= 0.0 {
                return Ok(vec![1.0 / children.len() as f64; children.len()]);
            }
            Ok(inv_vols.into_iter().map(|v| v / total).collect())
        }
        Weighting::MarketCap => Err(CoreError::ConfigError(format!(
            "node {node_id}: market-cap weighting requires a market-cap data source, which is out of scope"
        ))),
        Weighting::UserSpecified { weights } => {
            let values: Vec<f64> = children.iter().map(|c| weights.get(c.id()).copied().unwrap_or(0.0)).collect();
            let total: f64 = values.iter().sum();
            if total <= 0.0 {
                return Err(CoreError::ConfigError(format!("node {node_id}: user-specified child weights sum to zero")));
            }
            Ok(values.into_iter().map(|v| v / total).collect())
        }
    }
}

/// Volatility of the equal-weighted blend of `tickers`' returns, used as the
/// representative risk of a `basic` child for inverse-volatility weighting.
fn blended_volatility(tickers: &HashSet<Ticker>, histories: &HashMap<Ticker, Vec<f64>>, idx: usize, lookback: usize) -> f64 {
    if tickers.is_empty() || idx + 1 < lookback + 1 {
        return 0.0;
    }
    let mut blended = vec![0.0; lookback];
    for ticker in tickers {
        if let Some(series) = histories.get(ticker) {
            let window = &series[idx + 1 - lookback - 1..=idx];
            for (i, pair) in window.windows(2).enumerate() {
                blended[i] += (pair[1] - pair[0]) / pair[0];
            }
        }
    }
    let n = tickers.len() as f64;
    for value in &mut blended {
        *value /= n;
    }
    let mean = blended.iter().sum::<f64>() / blended.len() as f64;
    let variance = blended.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (blended.len() as f64 - 1.0).max(1.0);
    variance.sqrt()
}

fn apply_post_process(
    post_process: &PostProcess,
    allocation: Allocation,
    histories: &HashMap<Ticker, Vec<f64>>,
    idx: usize,
) -> CoreResult<Allocation> {
    match post_process {
        PostProcess::TopKByIndicator { k, indicator, params, descending } => {
            let mut ranked: Vec<(Ticker, f64, f64)> = Vec::new();
            for (ticker, weight) in &allocation {
                let reading = indicators::eval(indicator, slice_for(histories, ticker, idx)?, params)?;
                ranked.push((ticker.clone(), *weight, reading));
            }
            ranked.sort_by(|a, b| {
                if *descending {
                    b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)
                } else {
                    a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal)
                }
            });
            ranked.truncate(*k);
            renormalize(ranked.into_iter().map(|(t, w, _)| (t, w)).collect(), &allocation)
        }
        PostProcess::FilterBelowThreshold { indicator, params, threshold } => {
            let mut kept = Allocation::new();
            for (ticker, weight) in &allocation {
                let reading = indicators::eval(indicator, slice_for(histories, ticker, idx)?, params)?;
                if reading >= *threshold {
                    kept.insert(ticker.clone(), *weight);
                }
            }
            renormalize(kept, &allocation)
        }
        PostProcess::RebalanceTrigger { .. } => Ok(allocation),
    }
}

fn renormalize(kept: Allocation, original: &Allocation) -> CoreResult<Allocation> {
    let original_total: f64 = original.values().sum();
    let kept_total: f64 = kept.values().sum();
    if kept_total <= 0.0 || original_total <= 0.0 {
        return Ok(Allocation::new());
    }
    let scale = original_total / kept_total;
    Ok(kept.into_iter().map(|(t, w)| (t, w * scale)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult as Result;
    use crate::price::PriceSource;
    use crate::types::{Bar, PriceSeries, Tree};
    use crate::compressor::compress;

    struct FixedSource(HashMap<String, PriceSeries>);

    impl PriceSource for FixedSource {
        fn fetch_series(&self, ticker: &str) -> Result<PriceSeries> {
            self.0.get(ticker).cloned().ok_or_else(|| CoreError::DataMissing(ticker.to_string()))
        }
        fn latest_date(&self, probe_ticker: &str) -> Result<NaiveDate> {
            Ok(self.0[probe_ticker].bars.last().unwrap().date)
        }
    }

    fn series(start_price: f64, days: usize) -> PriceSeries {
        let mut bars = Vec::new();
        let mut price = start_price;
        for i in 0..days {
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(i as i64);
            price *= 1.0005;
            bars.push(Bar { date, open: price, high: price, low: price, close: price, adj_close: price });
        }
        PriceSeries { bars }
    }

    fn engine_with(tickers: &[(&str, PriceSeries)]) -> BacktestEngine {
        let map: HashMap<String, PriceSeries> = tickers.iter().map(|(t, s)| (t.to_string(), s.clone())).collect();
        let source = FixedSource(map);
        let cache = Arc::new(PriceCache::new(Arc::new(source)));
        BacktestEngine::new(cache)
    }

    #[test]
    fn single_position_tracks_the_underlying_ticker() {
        let spy = series(100.0, 120);
        let engine = engine_with(&[("SPY", spy.clone())]);
        let tree = Tree {
            root: Node::Position { id: "root".into(), tickers: vec!["SPY".into()], weighting: Weighting::Equal },
        };
        let compressed = compress(&tree).unwrap();
        let result = engine.run(&compressed, &BacktestConfig::default(), None).unwrap();

        assert_eq!(result.daily_returns.len() + 1, result.equity_curve.len());
        assert!((result.equity_curve[0].equity - (1.0 - 0.0)).abs() < 1e-9);
        assert!(result.equity_curve.last().unwrap().equity > 1.0);
    }

    #[test]
    fn rebalancing_cost_reduces_equity_relative_to_zero_cost() {
        let a = series(100.0, 120);
        let b = series(50.0, 120);
        let tree = || Tree {
            root: Node::Basic {
                id: "root".into(),
                weighting: Weighting::Equal,
                children: Slots {
                    next: vec![
                        Node::Position { id: "a".into(), tickers: vec!["A".into()], weighting: Weighting::Equal },
                        Node::Position { id: "b".into(), tickers: vec!["B".into()], weighting: Weighting::Equal },
                    ],
                    then: None,
                    r#else: None,
                },
            },
        };

        let engine = engine_with(&[("A", a), ("B", b)]);
        let compressed = compress(&tree()).unwrap();

        let zero_cost = BacktestConfig { mode: EvaluationMode::CC, cost_bps: 0.0 };
        let with_cost = BacktestConfig { mode: EvaluationMode::CC, cost_bps: 100.0 };

        let free = engine.run(&compressed, &zero_cost, None).unwrap();
        let costly = engine.run(&compressed, &with_cost, None).unwrap();

        assert!(costly.equity_curve.last().unwrap().equity <= free.equity_curve.last().unwrap().equity);
    }

    #[test]
    fn insufficient_history_after_warmup_is_rejected() {
        let spy = series(100.0, 10);
        let engine = engine_with(&[("SPY", spy)]);
        let tree = Tree {
            root: Node::Position { id: "root".into(), tickers: vec!["SPY".into()], weighting: Weighting::Equal },
        };
        let compressed = compress(&tree).unwrap();
        let err = engine.run(&compressed, &BacktestConfig::default(), None).unwrap_err();
        assert!(matches!(err, CoreError::DataInsufficient { .. }));
    }

    #[test]
    fn cancellation_flag_set_before_the_run_aborts_immediately() {
        let spy = series(100.0, 120);
        let engine = engine_with(&[("SPY", spy)]);
        let tree = Tree {
            root: Node::Position { id: "root".into(), tickers: vec!["SPY".into()], weighting: Weighting::Equal },
        };
        let compressed = compress(&tree).unwrap();
        let cancel = AtomicBool::new(true);
        let err = engine
            .run_cancellable(&compressed, &BacktestConfig::default(), None, Some(&cancel))
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn gate_chain_merge_preserves_or_semantics() {
        // cond1 (SPY < 30) is false every day; cond2 (QQQ < 1000) is true
        // every day. Pre-merge, `then` fires on cond1 OR cond2 -> TQQQ.
        // A buggy merge that ANDs the outer and nested conditions instead
        // of OR-ing them would route to BIL (the else branch) instead.
        let spy = series(200.0, 130);
        let qqq = series(10.0, 130);
        let tqqq = series(50.0, 130);
        let bil = series(20.0, 130);
        let engine = engine_with(&[("SPY", spy), ("QQQ", qqq), ("TQQQ", tqqq), ("BIL", bil)]);

        let cond1 = Condition {
            indicator: "PRICE".into(),
            ticker: "SPY".into(),
            params: Default::default(),
            comparator: crate::types::Comparator::Lt,
            rhs: crate::types::ConditionOperand::Literal { value: 30.0 },
            or_group: None,
        };
        let cond2 = Condition {
            indicator: "PRICE".into(),
            ticker: "QQQ".into(),
            params: Default::default(),
            comparator: crate::types::Comparator::Lt,
            rhs: crate::types::ConditionOperand::Literal { value: 1000.0 },
            or_group: None,
        };
        let then_branch =
            Node::Position { id: "tqqq".into(), tickers: vec!["TQQQ".into()], weighting: Weighting::Equal };
        let else_branch =
            Node::Position { id: "bil".into(), tickers: vec!["BIL".into()], weighting: Weighting::Equal };

        let inner_gate = Node::Indicator {
            id: "inner".into(),
            conditions: vec![cond2],
            children: Slots { next: vec![], then: Some(Box::new(then_branch.clone())), r#else: Some(Box::new(else_branch.clone())) },
        };
        let outer_gate = Node::Indicator {
            id: "outer".into(),
            conditions: vec![cond1],
            children: Slots { next: vec![], then: Some(Box::new(then_branch)), r#else: Some(Box::new(inner_gate)) },
        };
        let uncompressed = Tree { root: outer_gate };

        let compressed = compress(&uncompressed).unwrap();
        assert_eq!(compressed.stats.gate_chains_merged, 1, "test fixture should still trigger the merge");

        let config = BacktestConfig::default();
        let uncompressed_result = engine.run(&compress_identity(&uncompressed), &config, None).unwrap();
        let compressed_result = engine.run(&compressed, &config, None).unwrap();

        assert_eq!(uncompressed_result.allocations, compressed_result.allocations);
        assert_eq!(
            uncompressed_result.equity_curve.last().unwrap().equity,
            compressed_result.equity_curve.last().unwrap().equity
        );
    }

    /// Wraps an already-built tree in a `CompressedTree` without running
    /// `merge_gate_chains` or any other rewrite, so it can be run through
    /// the same `BacktestEngine::run` entry point as a merged tree while
    /// keeping its original (uncompressed) shape.
    fn compress_identity(tree: &Tree) -> crate::compressor::CompressedTree {
        let mut ticker_locations = HashMap::new();
        crate::compressor::compute_ticker_locations(&tree.root, &mut ticker_locations);
        let mut static_nodes = HashSet::new();
        crate::compressor::compute_static_nodes(&tree.root, &mut static_nodes);
        crate::compressor::CompressedTree {
            root: tree.root.clone(),
            ticker_locations,
            static_nodes,
            stats: CompressionStats { original_nodes: 0, compressed_nodes: 0, nodes_removed: 0, gate_chains_merged: 0 },
        }
    }

    /// Bounded-depth arbitrary tree over two tickers, nested `basic` groups
    /// up to `depth` deep. Mirrors the tree shapes the compressor's own
    /// property test generates, but only `position`/`basic` nodes: no
    /// conditions, so every draw evaluates without a price-dependent branch.
    fn arb_tree(depth: u32) -> impl proptest::strategy::Strategy<Value = Node> {
        use proptest::prelude::*;

        let leaf = prop_oneof!["A", "B"].prop_map(|t| Node::Position {
            id: format!("p{t}"),
            tickers: vec![t.to_string()],
            weighting: Weighting::Equal,
        });

        if depth == 0 {
            leaf.boxed()
        } else {
            prop_oneof![
                leaf.clone(),
                prop::collection::vec(arb_tree(depth - 1), 1..3).prop_map(|children| Node::Basic {
                    id: format!("b{depth}"),
                    weighting: Weighting::Equal,
                    children: Slots { next: children, then: None, r#else: None },
                }),
            ]
            .boxed()
        }
    }

    proptest::proptest! {
        #[test]
        fn allocation_weights_never_exceed_one(root in arb_tree(3)) {
            let a = series(100.0, 120);
            let b = series(80.0, 120);
            let engine = engine_with(&[("A", a), ("B", b)]);
            let compressed = compress(&Tree { root }).unwrap();
            let result = engine.run(&compressed, &BacktestConfig::default(), None);
            // A tree with no live tickers on a given day degrades to an empty
            // allocation elsewhere in the pipeline; only check the invariant
            // when the run actually produces a result.
            if let Ok(result) = result {
                for allocation in result.allocations.values() {
                    let total: f64 = allocation.values().sum();
                    proptest::prop_assert!(total <= 1.0 + 1e-6, "allocation weights summed to {total}");
                }
            }
        }
    }
}
