// Integration tests for bt-cache
// Requires a running Postgres instance (docker-compose up -d)

use bt_cache::types::{BacktestKey, BenchmarkKey, BenchmarkMetrics};
use bt_cache::{CacheConfig, CacheOutcome, ResultCache};
use bt_core::{BacktestResult, CompressionStats, EquityPoint, Metrics};
use chrono::NaiveDate;
use std::collections::HashMap;

fn test_config() -> CacheConfig {
    CacheConfig::default()
}

fn sample_result() -> BacktestResult {
    let curve = vec![
        EquityPoint { date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(), equity: 1.0 },
        EquityPoint { date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(), equity: 1.01 },
    ];
    BacktestResult {
        equity_curve: curve,
        benchmark_curve: None,
        daily_returns: Vec::new(),
        allocations: HashMap::new(),
        metrics: Metrics::default(),
        avg_turnover: 0.0,
        avg_holdings: 1.0,
        compression_stats: CompressionStats::default(),
    }
}

#[tokio::test]
#[ignore] // Requires a running Postgres instance
async fn test_cache_connects_and_initializes_schema() {
    let cache = ResultCache::new(test_config()).await;
    assert!(cache.is_ok(), "should connect and create tables");
}

#[tokio::test]
#[ignore]
async fn test_backtest_round_trip() {
    let cache = ResultCache::new(test_config()).await.unwrap();
    let key = BacktestKey {
        bot_id: "integration-test-bot".to_string(),
        payload_hash: "hash-a".to_string(),
        data_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
    };

    assert!(matches!(cache.get_backtest(&key).await, CacheOutcome::Miss));

    cache.put_backtest(&key, &sample_result()).await;

    match cache.get_backtest(&key).await {
        CacheOutcome::Hit(result) => assert_eq!(result.avg_holdings, 1.0),
        other => panic!("expected a hit, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_invalidate_bot_clears_only_that_bots_entries() {
    let cache = ResultCache::new(test_config()).await.unwrap();
    let key_a = BacktestKey {
        bot_id: "bot-a".to_string(),
        payload_hash: "hash-a".to_string(),
        data_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
    };
    let key_b = BacktestKey { bot_id: "bot-b".to_string(), ..key_a.clone() };

    cache.put_backtest(&key_a, &sample_result()).await;
    cache.put_backtest(&key_b, &sample_result()).await;

    cache.invalidate_bot("bot-a").await.unwrap();

    assert!(matches!(cache.get_backtest(&key_a).await, CacheOutcome::Miss));
    assert!(matches!(cache.get_backtest(&key_b).await, CacheOutcome::Hit(_)));
}

#[tokio::test]
#[ignore]
async fn test_benchmark_cache_round_trip() {
    let cache = ResultCache::new(test_config()).await.unwrap();
    let key = BenchmarkKey { ticker: "SPY".to_string(), data_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap() };
    let metrics = BenchmarkMetrics { ticker: "SPY".to_string(), data_date: key.data_date, metrics: Metrics::default() };

    cache.put_benchmark(&key, &metrics).await;

    match cache.get_benchmark(&key).await {
        CacheOutcome::Hit(m) => assert_eq!(m.ticker, "SPY"),
        other => panic!("expected a hit, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_daily_refresh_clears_everything_once() {
    let cache = ResultCache::new(test_config()).await.unwrap();
    let key = BacktestKey {
        bot_id: "refresh-test-bot".to_string(),
        payload_hash: "hash-a".to_string(),
        data_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
    };
    cache.put_backtest(&key, &sample_result()).await;

    let today = NaiveDate::from_ymd_opt(2026, 1, 4).unwrap();
    assert!(cache.check_and_trigger_daily_refresh(today).await.unwrap());
    assert!(!cache.check_and_trigger_daily_refresh(today).await.unwrap());

    assert!(matches!(cache.get_backtest(&key).await, CacheOutcome::Miss));
}
