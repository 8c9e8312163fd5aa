//! Core domain types: price bars, the strategy tree, and backtest results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// An uppercase ticker identifier.
pub type Ticker = String;

/// A single day's OHLC bar plus adjusted close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
}

/// An ordered, strictly increasing price history for one ticker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    pub bars: Vec<Bar>,
}

impl PriceSeries {
    /// Index of the bar on or before `date`, if any history exists at or before it.
    pub fn index_on_or_before(&self, date: NaiveDate) -> Option<usize> {
        match self.bars.binary_search_by_key(&date, |b| b.date) {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(idx) => Some(idx - 1),
        }
    }

    pub fn bar_on(&self, date: NaiveDate) -> Option<&Bar> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok().map(|i| &self.bars[i])
    }
}

/// How a `position` or `basic` node distributes weight across its children/tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Weighting {
    Equal,
    InverseVolatility { lookback: usize },
    MarketCap,
    UserSpecified { weights: BTreeMap<String, f64> },
}

/// Comparator used in a gate condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Comparator {
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Lt => lhs < rhs,
            Comparator::Lte => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Gte => lhs >= rhs,
            Comparator::Eq => (lhs - rhs).abs() < 1e-9,
        }
    }
}

/// The right-hand side of a condition: a literal, another indicator reading, or a
/// lookup into a sibling branch's prior accumulated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionOperand {
    Literal { value: f64 },
    Indicator {
        name: String,
        ticker: String,
        #[serde(default)]
        params: BTreeMap<String, f64>,
    },
    Branch { slot: String },
}

/// A single condition inside an `indicator` gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub indicator: String,
    pub ticker: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    pub comparator: Comparator,
    pub rhs: ConditionOperand,
    /// Set by the gate-chain merger; conditions sharing an `or_group` union before
    /// ANDing with the rest.
    #[serde(default)]
    pub or_group: Option<u32>,
}

/// Post-processing applied by a `function` node to its child's allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PostProcess {
    TopKByIndicator {
        k: usize,
        indicator: String,
        #[serde(default)]
        params: BTreeMap<String, f64>,
        descending: bool,
    },
    FilterBelowThreshold {
        indicator: String,
        #[serde(default)]
        params: BTreeMap<String, f64>,
        threshold: f64,
    },
    RebalanceTrigger {
        drift_threshold: f64,
    },
}

/// Named child slots. Non-terminals route via one or more of these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#else: Option<Box<Node>>,
}

/// A node in the strategy tree, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Position {
        id: String,
        tickers: Vec<String>,
        weighting: Weighting,
    },
    Basic {
        id: String,
        weighting: Weighting,
        children: Slots,
    },
    Indicator {
        id: String,
        conditions: Vec<Condition>,
        children: Slots,
    },
    Function {
        id: String,
        post_process: PostProcess,
        children: Slots,
    },
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Position { id, .. }
            | Node::Basic { id, .. }
            | Node::Indicator { id, .. }
            | Node::Function { id, .. } => id,
        }
    }
}

/// A tree rooted at `root`, as authored (pre-compression).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub root: Node,
}

/// Mapping from ticker to weight. Unallocated weight (Σ < 1) is cash.
pub type Allocation = BTreeMap<Ticker, f64>;

/// One day's point on an equity curve, starting at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// One day's simple return, `(equity[i] - equity[i-1]) / equity[i-1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyReturn {
    pub date: NaiveDate,
    pub value: f64,
}

/// Evaluation mode: close-to-close or open-to-close return accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationMode {
    CC,
    OC,
}

/// Settings that, together with the strategy payload, determine a backtest's cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub mode: EvaluationMode,
    pub cost_bps: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { mode: EvaluationMode::CC, cost_bps: 0.0 }
    }
}

impl BacktestConfig {
    pub fn from_yaml(yaml: &str) -> crate::error::CoreResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: &str) -> crate::error::CoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// Aggregate risk/return metrics computed from an equity curve (see `bt-analytics`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub cagr: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub treynor: Option<f64>,
    pub beta_spy: Option<f64>,
    pub win_rate: f64,
    pub avg_turnover: f64,
    pub avg_holdings: f64,
}

/// Statistics describing how much a tree shrank under compression.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_nodes: usize,
    pub compressed_nodes: usize,
    pub nodes_removed: usize,
    pub gate_chains_merged: usize,
}

/// Output of a full backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub benchmark_curve: Option<Vec<EquityPoint>>,
    pub daily_returns: Vec<DailyReturn>,
    pub allocations: HashMap<NaiveDate, Allocation>,
    pub metrics: Metrics,
    pub avg_turnover: f64,
    pub avg_holdings: f64,
    pub compression_stats: CompressionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_series_index_on_or_before() {
        let series = PriceSeries {
            bars: vec![
                Bar { date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), open: 1.0, high: 1.0, low: 1.0, close: 1.0, adj_close: 1.0 },
                Bar { date: NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(), open: 1.0, high: 1.0, low: 1.0, close: 1.0, adj_close: 1.0 },
            ],
        };
        let before_any = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(series.index_on_or_before(before_any), None);

        let mid = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert_eq!(series.index_on_or_before(mid), Some(0));

        let exact = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        assert_eq!(series.index_on_or_before(exact), Some(1));
    }

    #[test]
    fn node_id_accessor_covers_every_kind() {
        let position = Node::Position { id: "p1".into(), tickers: vec!["SPY".into()], weighting: Weighting::Equal };
        assert_eq!(position.id(), "p1");
    }

    #[test]
    fn backtest_config_round_trips_through_yaml() {
        let yaml = "mode: OC\ncost_bps: 5.0\n";
        let config = BacktestConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mode, EvaluationMode::OC);
        assert!((config.cost_bps - 5.0).abs() < 1e-9);
    }
}
