//! The price-store boundary and an in-memory cache over it.
//!
//! The canonical price store (ticker download pipeline, columnar warehouse)
//! is out of scope; only its read interface is specified. [`CsvPriceSource`]
//! is the one concrete adapter this crate ships: a columnar file per ticker
//! with `Date, Open, High, Low, Close, Adj Close` columns, matching the
//! "Ticker price on disk" interface.

use crate::error::{CoreError, CoreResult};
use crate::types::{Bar, PriceSeries, Ticker};
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A read-only source of daily price history, keyed by ticker.
pub trait PriceSource: Send + Sync {
    fn fetch_series(&self, ticker: &str) -> CoreResult<PriceSeries>;

    /// The maximum date present in the store, probed via a representative
    /// ticker (used as the cache-freshness key).
    fn latest_date(&self, probe_ticker: &str) -> CoreResult<NaiveDate>;
}

/// Reads one CSV file per ticker from a directory, named `<TICKER>.csv`.
pub struct CsvPriceSource {
    directory: PathBuf,
}

impl CsvPriceSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    fn path_for(&self, ticker: &str) -> PathBuf {
        self.directory.join(format!("{ticker}.csv"))
    }
}

impl PriceSource for CsvPriceSource {
    fn fetch_series(&self, ticker: &str) -> CoreResult<PriceSeries> {
        let path = self.path_for(ticker);
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;

        let mut bars = Vec::new();
        for record in reader.records() {
            let record = record?;
            let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")
                .map_err(|e| CoreError::StructuralError(format!("{ticker}: bad date {e}")))?;
            bars.push(Bar {
                date,
                open: record[1].parse().unwrap_or(f64::NAN),
                high: record[2].parse().unwrap_or(f64::NAN),
                low: record[3].parse().unwrap_or(f64::NAN),
                close: record[4].parse().unwrap_or(f64::NAN),
                adj_close: record[5].parse().unwrap_or(f64::NAN),
            });
        }

        if bars.is_empty() {
            return Err(CoreError::DataMissing(ticker.to_string()));
        }
        bars.sort_by_key(|b| b.date);
        Ok(PriceSeries { bars })
    }

    fn latest_date(&self, probe_ticker: &str) -> CoreResult<NaiveDate> {
        let series = self.fetch_series(probe_ticker)?;
        series.bars.last().map(|b| b.date).ok_or_else(|| CoreError::DataMissing(probe_ticker.to_string()))
    }
}

/// Process-wide, explicitly-managed price cache. Readers take an atomic
/// snapshot; writers replace the whole map. No fine-grained per-ticker
/// locking is needed beyond the snapshot swap, matching this system's "not a
/// hidden singleton" design note: callers construct it, `initialize` it from
/// a source, and may `clear`/`set_ttl` it explicitly.
pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    snapshot: RwLock<HashMap<Ticker, (PriceSeries, Instant)>>,
    ttl: RwLock<Duration>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self { source, snapshot: RwLock::new(HashMap::new()), ttl: RwLock::new(Duration::from_secs(300)) }
    }

    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    pub fn clear(&self) {
        self.snapshot.write().clear();
    }

    /// Populate the cache for `tickers` up front, so the evaluator's day loop
    /// never suspends on price-store I/O.
    pub fn initialize(&self, tickers: &[Ticker]) -> CoreResult<()> {
        for ticker in tickers {
            self.get(ticker)?;
        }
        Ok(())
    }

    pub fn get(&self, ticker: &str) -> CoreResult<PriceSeries> {
        let ttl = *self.ttl.read();
        if let Some((series, fetched_at)) = self.snapshot.read().get(ticker) {
            if fetched_at.elapsed() < ttl {
                return Ok(series.clone());
            }
        }

        debug!(ticker, "price cache miss, fetching from source");
        let series = self.source.fetch_series(ticker).map_err(|e| {
            warn!(ticker, error = %e, "price source fetch failed");
            e
        })?;
        self.snapshot.write().insert(ticker.to_string(), (series.clone(), Instant::now()));
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &std::path::Path, ticker: &str, rows: &[(&str, f64)]) {
        let mut file = std::fs::File::create(dir.join(format!("{ticker}.csv"))).unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Adj Close").unwrap();
        for (date, close) in rows {
            writeln!(file, "{date},{close},{close},{close},{close},{close}").unwrap();
        }
    }

    #[test]
    fn csv_source_reads_and_sorts_bars() {
        let dir = tempdir();
        write_csv(&dir, "SPY", &[("2024-01-03", 101.0), ("2024-01-02", 100.0)]);
        let source = CsvPriceSource::new(&dir);
        let series = source.fetch_series("SPY").unwrap();
        assert_eq!(series.bars.len(), 2);
        assert!(series.bars[0].date < series.bars[1].date);
    }

    #[test]
    fn missing_ticker_file_is_a_csv_error() {
        let dir = tempdir();
        let source = CsvPriceSource::new(&dir);
        let err = source.fetch_series("NOPE").unwrap_err();
        assert!(matches!(err, CoreError::CsvError(_)));
    }

    #[test]
    fn header_only_file_is_data_missing() {
        let dir = tempdir();
        write_csv(&dir, "EMPTY", &[]);
        let source = CsvPriceSource::new(&dir);
        let err = source.fetch_series("EMPTY").unwrap_err();
        assert!(matches!(err, CoreError::DataMissing(ticker) if ticker == "EMPTY"));
    }

    #[test]
    fn cache_populates_from_source_on_first_access() {
        let dir = tempdir();
        write_csv(&dir, "AAPL", &[("2024-01-02", 50.0)]);
        let cache = PriceCache::new(Arc::new(CsvPriceSource::new(&dir)));
        let series = cache.get("AAPL").unwrap();
        assert_eq!(series.bars.len(), 1);
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bt-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
