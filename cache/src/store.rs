use crate::config::CacheConfig;
use crate::error::{CacheError, CacheOutcome, Result};
use crate::pool::ConnectionPool;
use crate::types::{BacktestKey, BenchmarkKey, BenchmarkMetrics, CacheEntry, SanityKey};
use bt_analytics::SanityReport;
use bt_core::BacktestResult;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// DDL for the three result-cache tables. Each mirrors the same three-column
/// key shape (`bot_id`/`payload_hash`/`data_date` or `ticker`/`data_date`)
/// plus a JSONB payload and a `computed_at` timestamp.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS backtest_cache (
    bot_id        TEXT NOT NULL,
    payload_hash  TEXT NOT NULL,
    data_date     DATE NOT NULL,
    payload       JSONB NOT NULL,
    computed_at   TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (bot_id, payload_hash, data_date)
);

CREATE TABLE IF NOT EXISTS sanity_cache (
    bot_id        TEXT NOT NULL,
    payload_hash  TEXT NOT NULL,
    data_date     DATE NOT NULL,
    payload       JSONB NOT NULL,
    computed_at   TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (bot_id, payload_hash, data_date)
);

CREATE TABLE IF NOT EXISTS benchmark_cache (
    ticker        TEXT NOT NULL,
    data_date     DATE NOT NULL,
    payload       JSONB NOT NULL,
    computed_at   TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (ticker, data_date)
);
"#;

/// Content-addressed result cache for backtests, sanity reports, and
/// standalone benchmark metrics.
///
/// Wraps a [`ConnectionPool`] plus an in-memory `last_refresh`
/// date used by [`ResultCache::check_and_trigger_daily_refresh`]: the first
/// caller to observe a new calendar day invalidates every cached entry, so
/// a backtest run against yesterday's data is never served once today's
/// prices are in.
pub struct ResultCache {
    pool: Arc<ConnectionPool>,
    last_refresh: RwLock<Option<NaiveDate>>,
}

impl ResultCache {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        info!("Initializing ResultCache");
        let pool = ConnectionPool::new(&config.database).await?;
        pool.init_schemas().await?;
        Ok(Self { pool: Arc::new(pool), last_refresh: RwLock::new(None) })
    }

    /// Look up a cached backtest result. Any I/O or decode failure is
    /// logged and downgraded to a miss rather than propagated —
    /// a cache that can't be read is no worse than a cold cache.
    pub async fn get_backtest(&self, key: &BacktestKey) -> CacheOutcome<BacktestResult> {
        match self.fetch_one(
            "SELECT payload, computed_at FROM backtest_cache WHERE bot_id = $1 AND payload_hash = $2 AND data_date = $3",
            &[&key.bot_id, &key.payload_hash, &key.data_date],
        )
        .await
        {
            Ok(Some(entry)) => CacheOutcome::Hit(entry.value),
            Ok(None) => CacheOutcome::Miss,
            Err(e) => {
                warn!("backtest cache read failed for {}/{}: {e}", key.bot_id, key.payload_hash);
                CacheOutcome::Miss
            }
        }
    }

    /// Write a freshly computed result back to the cache. Returns the write
    /// error (already logged) rather than swallowing it outright, so a
    /// caller that just computed `result` itself can still report a
    /// [`CacheOutcome::Degraded`] instead of a silent [`CacheOutcome::Hit`].
    pub async fn put_backtest(&self, key: &BacktestKey, result: &BacktestResult) -> Option<CacheError> {
        self.upsert(
            "INSERT INTO backtest_cache (bot_id, payload_hash, data_date, payload, computed_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (bot_id, payload_hash, data_date) DO UPDATE SET payload = EXCLUDED.payload, computed_at = EXCLUDED.computed_at",
            &[&key.bot_id, &key.payload_hash, &key.data_date],
            result,
        )
        .await
        .err()
        .inspect(|e| warn!("backtest cache write failed for {}/{}: {e}", key.bot_id, key.payload_hash))
    }

    pub async fn get_sanity(&self, key: &SanityKey) -> CacheOutcome<SanityReport> {
        match self.fetch_one(
            "SELECT payload, computed_at FROM sanity_cache WHERE bot_id = $1 AND payload_hash = $2 AND data_date = $3",
            &[&key.bot_id, &key.payload_hash, &key.data_date],
        )
        .await
        {
            Ok(Some(entry)) => CacheOutcome::Hit(entry.value),
            Ok(None) => CacheOutcome::Miss,
            Err(e) => {
                warn!("sanity cache read failed for {}/{}: {e}", key.bot_id, key.payload_hash);
                CacheOutcome::Miss
            }
        }
    }

    pub async fn put_sanity(&self, key: &SanityKey, report: &SanityReport) -> Option<CacheError> {
        self.upsert(
            "INSERT INTO sanity_cache (bot_id, payload_hash, data_date, payload, computed_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (bot_id, payload_hash, data_date) DO UPDATE SET payload = EXCLUDED.payload, computed_at = EXCLUDED.computed_at",
            &[&key.bot_id, &key.payload_hash, &key.data_date],
            report,
        )
        .await
        .err()
        .inspect(|e| warn!("sanity cache write failed for {}/{}: {e}", key.bot_id, key.payload_hash))
    }

    pub async fn get_benchmark(&self, key: &BenchmarkKey) -> CacheOutcome<BenchmarkMetrics> {
        match self
            .fetch_one(
                "SELECT payload, computed_at FROM benchmark_cache WHERE ticker = $1 AND data_date = $2",
                &[&key.ticker, &key.data_date],
            )
            .await
        {
            Ok(Some(entry)) => CacheOutcome::Hit(entry.value),
            Ok(None) => CacheOutcome::Miss,
            Err(e) => {
                warn!("benchmark cache read failed for {}: {e}", key.ticker);
                CacheOutcome::Miss
            }
        }
    }

    pub async fn put_benchmark(&self, key: &BenchmarkKey, metrics: &BenchmarkMetrics) -> Option<CacheError> {
        self.upsert(
            "INSERT INTO benchmark_cache (ticker, data_date, payload, computed_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (ticker, data_date) DO UPDATE SET payload = EXCLUDED.payload, computed_at = EXCLUDED.computed_at",
            &[&key.ticker, &key.data_date],
            metrics,
        )
        .await
        .err()
        .inspect(|e| warn!("benchmark cache write failed for {}: {e}", key.ticker))
    }

    /// Drop every cache entry belonging to one bot, across all three
    /// tables — used when a bot's tree definition changes in a way that
    /// doesn't roll into a new `payload_hash` (e.g. a rename) or when an
    /// operator wants to force recomputation for one strategy.
    pub async fn invalidate_bot(&self, bot_id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("DELETE FROM backtest_cache WHERE bot_id = $1", &[&bot_id]).await?;
        client.execute("DELETE FROM sanity_cache WHERE bot_id = $1", &[&bot_id]).await?;
        info!("invalidated all cache entries for bot {bot_id}");
        Ok(())
    }

    /// Drop every cache entry in all three tables.
    pub async fn invalidate_all(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("TRUNCATE backtest_cache, sanity_cache, benchmark_cache", &[]).await?;
        *self.last_refresh.write() = None;
        info!("invalidated entire result cache");
        Ok(())
    }

    /// Invalidate everything the first time this is called on a new
    /// calendar day (by wall-clock `today`, not `data_date` — the two
    /// diverge on weekends/holidays when no new trading day exists).
    /// Returns whether an invalidation actually ran.
    pub async fn check_and_trigger_daily_refresh(&self, today: NaiveDate) -> Result<bool> {
        if !should_refresh(*self.last_refresh.read(), today) {
            return Ok(false);
        }
        self.invalidate_all().await?;
        *self.last_refresh.write() = Some(today);
        Ok(true)
    }

    async fn fetch_one<T>(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<Option<CacheEntry<T>>>
    where
        T: serde::de::DeserializeOwned,
    {
        let client = self.pool.get().await?;
        let row = client.query_opt(sql, params).await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: serde_json::Value = row.get(0);
        let computed_at = row.get(1);
        let value: T = serde_json::from_value(payload)?;
        debug!("cache hit");
        Ok(Some(CacheEntry { value, computed_at }))
    }

    /// `keys` holds the table's natural-key columns in positional order;
    /// `payload` and `computed_at` are always appended as the last two
    /// bind parameters, matching every `SCHEMA_SQL` table's trailing
    /// `payload, computed_at` columns regardless of how many key columns
    /// precede them (two for `benchmark_cache`, three elsewhere).
    async fn upsert<T: serde::Serialize>(
        &self,
        sql: &str,
        keys: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        value: &T,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        let payload = serde_json::to_value(value)?;
        let computed_at = chrono::Utc::now();
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::with_capacity(keys.len() + 2);
        params.extend_from_slice(keys);
        params.push(&payload);
        params.push(&computed_at);
        client.execute(sql, &params).await?;
        Ok(())
    }

    pub fn pool_status(&self) -> String {
        self.pool.status().to_string()
    }
}

/// True the first time `today` is observed: either no refresh has ever
/// happened, or the last one recorded a strictly earlier date.
fn should_refresh(last_refresh: Option<NaiveDate>, today: NaiveDate) -> bool {
    match last_refresh {
        None => true,
        Some(last) => last < today,
    }
}
