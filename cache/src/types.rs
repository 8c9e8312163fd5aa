//! Cache keys and stored payloads for the three result tables:
//! backtests, sanity reports, and standalone benchmark metrics.
//!
//! `payload_hash` already folds `mode`/`cost_bps` into the hash itself
//! ([`bt_core::payload_hash`]), so [`BacktestKey`] and [`SanityKey`] need no
//! separate settings fields — two trees that only differ in evaluation
//! settings never collide, and a hash is never shared between a backtest
//! entry and a sanity-report entry.

use bt_core::Metrics;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Key for a cached backtest result: one bot's strategy tree, evaluated
/// against data as of a given trading day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BacktestKey {
    pub bot_id: String,
    pub payload_hash: String,
    pub data_date: NaiveDate,
}

/// Key for a cached sanity report. Same shape as [`BacktestKey`]; kept as a
/// distinct type so the two can never be interchanged at a call site even
/// though they share columns in the underlying tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SanityKey {
    pub bot_id: String,
    pub payload_hash: String,
    pub data_date: NaiveDate,
}

/// Key for a cached standalone benchmark's metrics (e.g. SPY held flat),
/// independent of any bot — shared across every strategy that references
/// the same ticker on the same data date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BenchmarkKey {
    pub ticker: String,
    pub data_date: NaiveDate,
}

/// A standalone ticker's performance metrics over the full available
/// history as of `data_date`, computed the same way a single-[`Position`]
/// bot's metrics would be (`bt_core::types::Node::Position`), stored so
/// beta/Treynor computations and the optimizer's benchmark objective don't
/// re-run that backtest on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub ticker: String,
    pub data_date: NaiveDate,
    pub metrics: Metrics,
}

/// A cached value plus the wall-clock time it was computed, returned to
/// callers so they can judge freshness independent of `data_date` (which
/// only tracks which trading day's prices were used, not when the compute
/// ran).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub computed_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self { value, computed_at: Utc::now() }
    }
}
