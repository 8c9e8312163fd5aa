//! Content-addressed result cache for bt-core backtests and bt-analytics
//! reports.
//!
//! Three Postgres tables (`backtest_cache`, `sanity_cache`, `benchmark_cache`)
//! sit behind a [`ConnectionPool`]; [`ResultCache`] wraps the pool plus an
//! in-memory "last refresh happened on this date" marker so the first
//! request of a new trading day invalidates everything instead of serving
//! results computed against yesterday's prices.
//!
//! # Example
//!
//! ```no_run
//! use bt_cache::{CacheConfig, ResultCache};
//! use bt_cache::types::BacktestKey;
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::default();
//!     let cache = ResultCache::new(config).await?;
//!
//!     let key = BacktestKey {
//!         bot_id: "momentum-rotation".to_string(),
//!         payload_hash: "deadbeef".to_string(),
//!         data_date: NaiveDate::from_ymd_opt(2026, 7, 27).unwrap(),
//!     };
//!     let _ = cache.get_backtest(&key).await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pool;
pub mod store;
pub mod types;

pub use config::{CacheConfig, DatabaseConfig, RefreshConfig};
pub use error::{CacheError, CacheOutcome, Result};
pub use pool::{ConnectionPool, PoolStatus};
pub use store::ResultCache;
pub use types::{BacktestKey, BenchmarkKey, BenchmarkMetrics, CacheEntry, SanityKey};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing subscriber (for examples and tests)
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bt_cache=info"));

    fmt().with_env_filter(filter).with_target(false).with_thread_ids(true).with_file(true).with_line_number(true).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
    }
}
