//! # bt-core: strategy tree model, compressor, evaluator, and price access
//!
//! This crate owns the data that a backtest is built from and the day-loop
//! evaluator that runs it: the strategy tree's node types, the compressor
//! that rewrites a tree into a smaller equivalent form, the fixed indicator
//! registry, the price-source boundary (with an explicitly-managed in-memory
//! cache on top), and [`backtest::BacktestEngine`] itself.
//!
//! ## Example
//!
//! ```rust
//! use bt_core::types::{Node, Tree, Weighting};
//! use bt_core::compressor::compress;
//!
//! let tree = Tree {
//!     root: Node::Position {
//!         id: "root".to_string(),
//!         tickers: vec!["SPY".to_string()],
//!         weighting: Weighting::Equal,
//!     },
//! };
//! let compressed = compress(&tree).unwrap();
//! assert_eq!(compressed.stats.original_nodes, 1);
//! ```

#[path = "../backtest/mod.rs"]
pub mod backtest;
pub mod compressor;
pub mod error;
pub mod indicators;
pub mod price;
pub mod types;

pub use backtest::BacktestEngine;
pub use compressor::{compress, payload_hash, CompressedTree};
pub use error::{CoreError, CoreResult};
pub use price::{CsvPriceSource, PriceCache, PriceSource};
pub use types::{
    Allocation, Bar, BacktestConfig, BacktestResult, Comparator, Condition, ConditionOperand,
    DailyReturn, EquityPoint, EvaluationMode, Metrics, Node, PostProcess, PriceSeries, Slots,
    Ticker, Tree, Weighting,
};
