//! Read-only reporting
//!
//! Stats, open positions with derived fields, recent trades and hourly
//! buckets. Nothing here mutates the engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::Config;
use crate::engine::{SharedEngine, TradingEngine};
use crate::error::Result;
use crate::ledger::{Stats, Trade};
use crate::persistence::SnapshotStore;
use crate::position::Position;

/// Buckets kept by `hourly`
pub const HOURLY_BUCKETS: usize = 24;

/// Stats plus derived ratios
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub stats: Stats,
    /// (capital - initial) / initial
    pub roi: f64,
    pub win_rate: f64,
    pub open_positions: usize,
    /// Invested amount tied up in open positions
    pub open_exposure: f64,
    pub unrealized_pnl: f64,
    /// Trades held in memory (may be fewer than `total_trades` after a restore)
    pub trade_history_len: usize,
}

impl StatsReport {
    pub fn from_engine(engine: &TradingEngine) -> Self {
        let stats = engine.stats().clone();
        Self {
            roi: stats.roi(),
            win_rate: stats.win_rate(),
            open_positions: engine.open_count(),
            open_exposure: engine.open_exposure(),
            unrealized_pnl: engine.unrealized_pnl(),
            trade_history_len: engine.trades().len(),
            stats,
        }
    }
}

/// Open position with live derived fields
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub current_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_profit_pct: f64,
    pub age_secs: f64,
}

impl PositionView {
    pub fn new(position: Position, now: DateTime<Utc>) -> Self {
        Self {
            current_value: position.current_value(),
            unrealized_pnl: position.unrealized_pnl(),
            unrealized_profit_pct: position.unrealized_profit_pct(),
            age_secs: position.age_secs(now),
            position,
        }
    }
}

/// Trades grouped by the hour they were sold in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub trades: u64,
    pub wins: u64,
    pub net_profit: f64,
}

impl HourlyBucket {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades as f64
    }
}

fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(ts)
}

/// The last `limit` hours with trades, oldest first
pub fn hourly_buckets(trades: &[Trade], limit: usize) -> Vec<HourlyBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, HourlyBucket> = BTreeMap::new();
    for trade in trades {
        let hour = hour_start(trade.sell_timestamp);
        let bucket = buckets.entry(hour).or_insert(HourlyBucket {
            hour,
            trades: 0,
            wins: 0,
            net_profit: 0.0,
        });
        bucket.trades += 1;
        if trade.is_win() {
            bucket.wins += 1;
        }
        bucket.net_profit += trade.realized_net_profit;
    }

    let skip = buckets.len().saturating_sub(limit);
    buckets.into_values().skip(skip).collect()
}

/// Read-only view over a shared engine
#[derive(Clone)]
pub struct Reporter {
    engine: SharedEngine,
}

impl Reporter {
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }

    /// Reporter over the last saved snapshot
    ///
    /// An unreadable snapshot degrades to a fresh engine's stats.
    pub async fn from_store(store: &SnapshotStore, config: &Config) -> Result<Self> {
        let mut engine = TradingEngine::new(config, Utc::now())?;
        match store.load().await {
            Ok(Some(snapshot)) => engine.restore(snapshot),
            Ok(None) => {}
            Err(e) => warn!("Reporting from empty state: {}", e),
        }
        Ok(Self::new(engine.into_shared()))
    }

    pub async fn stats_report(&self) -> StatsReport {
        StatsReport::from_engine(&*self.engine.lock().await)
    }

    pub async fn open_positions(&self, now: DateTime<Utc>) -> Vec<PositionView> {
        self.engine
            .lock()
            .await
            .open_positions()
            .into_iter()
            .map(|p| PositionView::new(p, now))
            .collect()
    }

    /// Up to `limit` trades, newest first
    pub async fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.engine.lock().await.recent_trades(limit)
    }

    pub async fn hourly(&self) -> Vec<HourlyBucket> {
        hourly_buckets(self.engine.lock().await.trades(), HOURLY_BUCKETS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::observation;
    use crate::position::ExitReason;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.trading.initial_capital_usd = 100.0;
        config.trading.position_size_usd = 10.0;
        config.fees.swap_fee_pct = 0.0;
        config
    }

    fn trade_at(pair: &str, sell_price: f64, at: DateTime<Utc>) -> Trade {
        let position = Position::open(&observation(pair, 1.0), 10.0, 0.0, 0, at);
        Trade::from_close(position, sell_price, 0.0, ExitReason::TakeProfit, at)
    }

    #[test]
    fn test_hourly_buckets() {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let trades = vec![
            trade_at("a", 1.5, base + Duration::minutes(5)),
            trade_at("b", 0.5, base + Duration::minutes(55)),
            trade_at("c", 1.2, base + Duration::minutes(65)),
        ];

        let buckets = hourly_buckets(&trades, 24);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].hour, base);
        assert_eq!(buckets[0].trades, 2);
        assert_eq!(buckets[0].wins, 1);
        assert!((buckets[0].net_profit - 0.0).abs() < 1e-9);
        assert!((buckets[0].win_rate() - 0.5).abs() < 1e-12);
        assert_eq!(buckets[1].hour, base + Duration::hours(1));

        let last = hourly_buckets(&trades, 1);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].hour, base + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_reporter_views() {
        let config = test_config();
        let now = Utc::now();
        let mut engine = TradingEngine::new(&config, now).unwrap();
        let sold = engine.open(&observation("a", 1.0), 80, now).unwrap();
        engine.close(&sold.id, 1.5, ExitReason::TakeProfit, now).unwrap();
        let held = engine.open(&observation("b", 1.0), 80, now).unwrap();
        engine.check_position(&held.id, 1.2, now).unwrap();

        let reporter = Reporter::new(engine.into_shared());

        let report = reporter.stats_report().await;
        // 100 - 10 + 15 - 10, open position not counted
        assert!((report.stats.capital - 95.0).abs() < 1e-9);
        assert!((report.roi + 0.05).abs() < 1e-9);
        assert!((report.win_rate - 1.0).abs() < 1e-12);
        assert_eq!(report.open_positions, 1);
        assert!((report.open_exposure - 10.0).abs() < 1e-9);
        assert!((report.unrealized_pnl - 2.0).abs() < 1e-9);
        assert_eq!(report.trade_history_len, 1);

        let views = reporter.open_positions(now + Duration::seconds(90)).await;
        assert_eq!(views.len(), 1);
        assert!((views[0].unrealized_profit_pct - 0.2).abs() < 1e-9);
        assert!((views[0].age_secs - 90.0).abs() < 1e-9);

        assert_eq!(reporter.recent_trades(50).await.len(), 1);
        assert_eq!(reporter.hourly().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reporter_degrades_on_unreadable_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();

        let reporter = Reporter::from_store(&SnapshotStore::new(&path), &test_config())
            .await
            .unwrap();
        let report = reporter.stats_report().await;

        assert_eq!(report.stats.capital, 100.0);
        assert_eq!(report.stats.total_trades, 0);
        assert_eq!(report.roi, 0.0);
    }

    #[tokio::test]
    async fn test_reporter_reads_saved_snapshot() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let config = test_config();
        let now = Utc::now();

        let mut engine = TradingEngine::new(&config, now).unwrap();
        engine.open(&observation("a", 1.0), 80, now).unwrap();
        store.save(&engine.snapshot(100, now)).await.unwrap();

        let reporter = Reporter::from_store(&store, &config).await.unwrap();
        assert_eq!(reporter.open_positions(now).await.len(), 1);
        assert!((reporter.stats_report().await.stats.capital - 90.0).abs() < 1e-9);
    }
}
