//! Tick scheduler
//!
//! Drives the engine one tick at a time:
//! 1. Evaluating: fetch a price for every open position, close those whose
//!    exit rule fires. One failing position never aborts the others.
//! 2. Scanning: if there is room and capital, fetch observations, score
//!    them and open at most one position.
//! 3. Persist the snapshot when state changed and the cadence allows.
//!
//! The engine lock is only held between collaborator calls, never across
//! them. A trade closed after the last flush is lost from disk on a crash.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SchedulerConfig};
use crate::engine::SharedEngine;
use crate::error::{Error, Result};
use crate::feed::{PriceSource, TokenFeed, TokenObservation};
use crate::ledger::Trade;
use crate::persistence::SnapshotStore;
use crate::position::Position;
use crate::report::StatsReport;

/// Where the scheduler is within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    Evaluating,
    Scanning,
}

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub closed: Vec<Trade>,
    pub opened: Option<Position>,
    /// Positions skipped because no usable price arrived
    pub price_failures: usize,
    pub feed_failed: bool,
    /// Observations returned by the feed
    pub observed: usize,
    pub persisted: bool,
}

pub struct TickScheduler {
    engine: SharedEngine,
    feed: Arc<dyn TokenFeed>,
    prices: Arc<dyn PriceSource>,
    store: SnapshotStore,
    config: SchedulerConfig,
    request_timeout: Duration,
    trade_history_limit: usize,
    state: TickState,
    ticks: u64,
    last_persist: Option<Instant>,
    last_report: Instant,
}

impl TickScheduler {
    pub fn new(
        engine: SharedEngine,
        feed: Arc<dyn TokenFeed>,
        prices: Arc<dyn PriceSource>,
        store: SnapshotStore,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            feed,
            prices,
            store,
            config: config.scheduler.clone(),
            request_timeout: Duration::from_millis(config.feed.request_timeout_ms),
            trade_history_limit: config.persistence.trade_history_limit,
            state: TickState::Idle,
            ticks: 0,
            last_persist: None,
            last_report: Instant::now(),
        }
    }

    pub fn state(&self) -> TickState {
        self.state
    }

    /// Completed ticks
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run ticks until cancelled or `max_ticks` is reached, then flush
    pub async fn run(&mut self, shutdown: CancellationToken, max_ticks: Option<u64>) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler started: feed={}, tick every {}ms",
            self.feed.name(),
            self.config.tick_interval_ms
        );

        loop {
            if max_ticks.map_or(false, |max| self.ticks >= max) {
                info!("Reached {} ticks", self.ticks);
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.closed.is_empty() || report.opened.is_some() {
                        debug!(
                            "Tick {}: {} closed, opened {}",
                            self.ticks,
                            report.closed.len(),
                            report.opened.as_ref().map_or("none", |p| p.pair_id.as_str())
                        );
                    }
                }
            }
        }

        self.flush().await?;
        info!("Scheduler stopped after {} ticks", self.ticks);
        Ok(())
    }

    /// One full tick
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.state = TickState::Evaluating;
        self.evaluate_positions(&mut report).await;

        self.state = TickState::Scanning;
        self.scan(&mut report).await;

        self.state = TickState::Idle;
        report.persisted = self.persist_if_due().await;
        self.report_if_due().await;

        self.ticks += 1;
        report
    }

    async fn evaluate_positions(&mut self, report: &mut TickReport) {
        let watch_list = self.engine.lock().await.watch_list();

        for (position_id, pair_id) in watch_list {
            let price = match self.fetch_price(&pair_id).await {
                Ok(price) => price,
                Err(e) => {
                    warn!("Skipping {} this tick: {}", pair_id, e);
                    report.price_failures += 1;
                    continue;
                }
            };

            let result = self
                .engine
                .lock()
                .await
                .check_position(&position_id, price, Utc::now());
            match result {
                Ok(Some(trade)) => report.closed.push(trade),
                Ok(None) => {}
                Err(e @ Error::PriceUnavailable { .. }) => {
                    warn!("Skipping {} this tick: {}", pair_id, e);
                    report.price_failures += 1;
                }
                Err(e) => warn!("Failed to check position {}: {}", position_id, e),
            }
        }
    }

    async fn scan(&mut self, report: &mut TickReport) {
        if !self.engine.lock().await.has_room() {
            debug!("No room for a new position, skipping scan");
            return;
        }

        let observations = match self.fetch_observations().await {
            Ok(observations) => observations,
            Err(e) => {
                warn!("Feed {} unavailable this tick: {}", self.feed.name(), e);
                report.feed_failed = true;
                return;
            }
        };
        report.observed = observations.len();

        let now = Utc::now();
        let mut engine = self.engine.lock().await;
        let Some(candidate) = engine.select_candidate(&observations, now) else {
            return;
        };

        match engine.open(&candidate.observation, candidate.score.total_score, now) {
            Ok(position) => report.opened = Some(position),
            Err(e) if e.is_rejection() => {
                info!("Open of {} rejected: {}", candidate.observation.pair_id, e)
            }
            Err(e) => warn!("Failed to open {}: {}", candidate.observation.pair_id, e),
        }
    }

    async fn fetch_price(&self, pair_id: &str) -> Result<f64> {
        tokio::time::timeout(self.request_timeout, self.prices.fetch_price(pair_id))
            .await
            .map_err(|_| Error::Timeout(self.request_timeout.as_millis() as u64))?
    }

    async fn fetch_observations(&self) -> Result<Vec<TokenObservation>> {
        tokio::time::timeout(self.request_timeout, self.feed.fetch_observations())
            .await
            .map_err(|_| Error::Timeout(self.request_timeout.as_millis() as u64))?
    }

    /// Save if state changed and the persist interval has passed
    async fn persist_if_due(&mut self) -> bool {
        let interval = Duration::from_secs(self.config.persist_interval_secs);
        let due = self
            .last_persist
            .map_or(true, |last| last.elapsed() >= interval);
        if !due {
            return false;
        }

        let snapshot = {
            let mut engine = self.engine.lock().await;
            if !engine.take_changes() {
                return false;
            }
            engine.snapshot(self.trade_history_limit, Utc::now())
        };

        match self.store.save(&snapshot).await {
            Ok(()) => {
                self.last_persist = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!("{}", e);
                self.engine.lock().await.mark_changed();
                false
            }
        }
    }

    /// Save unconditionally
    pub async fn flush(&mut self) -> Result<()> {
        let snapshot = {
            let mut engine = self.engine.lock().await;
            engine.take_changes();
            engine.snapshot(self.trade_history_limit, Utc::now())
        };
        self.store.save(&snapshot).await?;
        self.last_persist = Some(Instant::now());
        info!("Flushed state to {}", self.store.path().display());
        Ok(())
    }

    async fn report_if_due(&mut self) {
        if self.last_report.elapsed() < Duration::from_secs(self.config.report_interval_secs) {
            return;
        }
        self.last_report = Instant::now();

        let report = StatsReport::from_engine(&*self.engine.lock().await);
        info!(
            "Periodic report: capital ${:.4} (ROI {:.2}%), {} trades ({} wins, {:.1}% win rate), net P&L ${:.4}, {} open (unrealized ${:+.4})",
            report.stats.capital,
            report.roi * 100.0,
            report.stats.total_trades,
            report.stats.wins,
            report.win_rate * 100.0,
            report.stats.net_realized_profit,
            report.open_positions,
            report.unrealized_pnl
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TradingEngine;
    use crate::feed::testing::{observation, ScriptedPrices, SlowFeed, SlowPrices, StaticFeed};
    use crate::position::ExitReason;
    use tempfile::{tempdir, TempDir};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.trading.initial_capital_usd = 100.0;
        config.trading.position_size_usd = 10.0;
        config.fees.swap_fee_pct = 0.0;
        config.scheduler.persist_interval_secs = 0;
        config.scheduler.tick_interval_ms = 1;
        config.feed.request_timeout_ms = 200;
        config
    }

    struct Harness {
        scheduler: TickScheduler,
        engine: SharedEngine,
        prices: Arc<ScriptedPrices>,
        store: SnapshotStore,
        _dir: TempDir,
    }

    fn harness(config: &Config, observations: Vec<TokenObservation>, feed_fails: bool) -> Harness {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let engine = TradingEngine::new(config, Utc::now()).unwrap().into_shared();
        let prices = Arc::new(ScriptedPrices::default());
        let feed = Arc::new(StaticFeed {
            observations,
            fail: feed_fails,
        });
        let scheduler = TickScheduler::new(
            engine.clone(),
            feed,
            prices.clone(),
            store.clone(),
            config,
        );
        Harness {
            scheduler,
            engine,
            prices,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_tick_opens_then_closes() {
        let config = test_config();
        let mut h = harness(&config, vec![observation("a", 1.0), observation("b", 1.0)], false);

        let report = h.scheduler.tick().await;
        assert_eq!(report.opened.as_ref().map(|p| p.pair_id.as_str()), Some("a"));
        assert_eq!(report.observed, 2);
        assert_eq!(h.scheduler.state(), TickState::Idle);

        h.prices.set("a", 1.5).await;
        let report = h.scheduler.tick().await;
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].exit_reason, ExitReason::TakeProfit);
        // "a" is in cooldown, so "b" is bought
        assert_eq!(report.opened.as_ref().map(|p| p.pair_id.as_str()), Some("b"));
        assert_eq!(h.scheduler.ticks(), 2);
    }

    #[tokio::test]
    async fn test_price_failure_is_isolated() {
        let config = test_config();
        let mut h = harness(&config, vec![], false);
        {
            let mut engine = h.engine.lock().await;
            engine.open(&observation("a", 1.0), 90, Utc::now()).unwrap();
            engine.open(&observation("b", 1.0), 90, Utc::now()).unwrap();
        }
        // No quote for "a", "b" hits the stop-loss
        h.prices.set("b", 0.5).await;

        let report = h.scheduler.tick().await;

        assert_eq!(report.price_failures, 1);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].exit_reason, ExitReason::StopLoss);

        let engine = h.engine.lock().await;
        let held = engine.open_positions();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].pair_id, "a");
        assert_eq!(held[0].check_count, 0);
    }

    #[tokio::test]
    async fn test_non_positive_price_is_skipped() {
        let config = test_config();
        let mut h = harness(&config, vec![], false);
        h.engine
            .lock()
            .await
            .open(&observation("a", 1.0), 90, Utc::now())
            .unwrap();
        h.prices.set("a", 0.0).await;

        let report = h.scheduler.tick().await;
        assert_eq!(report.price_failures, 1);
        assert_eq!(h.engine.lock().await.open_positions()[0].check_count, 0);
    }

    #[tokio::test]
    async fn test_feed_failure_does_not_abort_tick() {
        let config = test_config();
        let mut h = harness(&config, vec![observation("a", 1.0)], true);

        let report = h.scheduler.tick().await;
        assert!(report.feed_failed);
        assert!(report.opened.is_none());
        assert_eq!(h.scheduler.ticks(), 1);
    }

    #[tokio::test]
    async fn test_stalled_price_counts_as_failure() {
        let mut config = test_config();
        config.feed.request_timeout_ms = 20;
        let dir = tempdir().unwrap();
        let engine = TradingEngine::new(&config, Utc::now()).unwrap().into_shared();
        {
            let mut engine = engine.lock().await;
            engine.open(&observation("a", 1.0), 90, Utc::now()).unwrap();
            engine.open(&observation("b", 1.0), 90, Utc::now()).unwrap();
        }
        let prices = SlowPrices {
            prices: ScriptedPrices::default(),
            stalled: vec!["a".into()],
            delay: Duration::from_secs(30),
        };
        prices.prices.set("a", 2.0).await;
        prices.prices.set("b", 0.5).await;
        let feed = Arc::new(StaticFeed {
            observations: vec![],
            fail: false,
        });
        let mut scheduler = TickScheduler::new(
            engine.clone(),
            feed,
            Arc::new(prices),
            SnapshotStore::new(dir.path().join("state.json")),
            &config,
        );

        let report = scheduler.tick().await;

        assert_eq!(report.price_failures, 1);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].position.pair_id, "b");
        let engine = engine.lock().await;
        let held = engine.open_positions();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].pair_id, "a");
        assert_eq!(held[0].check_count, 0);
        assert_eq!(held[0].current_price, 1.0);
    }

    #[tokio::test]
    async fn test_stalled_feed_counts_as_failure() {
        let mut config = test_config();
        config.feed.request_timeout_ms = 20;
        let dir = tempdir().unwrap();
        let engine = TradingEngine::new(&config, Utc::now()).unwrap().into_shared();
        let feed = Arc::new(SlowFeed {
            observations: vec![observation("a", 1.0)],
            delay: Duration::from_secs(30),
        });
        let mut scheduler = TickScheduler::new(
            engine.clone(),
            feed,
            Arc::new(ScriptedPrices::default()),
            SnapshotStore::new(dir.path().join("state.json")),
            &config,
        );

        let report = scheduler.tick().await;

        assert!(report.feed_failed);
        assert!(report.opened.is_none());
        assert_eq!(report.observed, 0);
        assert_eq!(engine.lock().await.open_count(), 0);
        assert_eq!(scheduler.state(), TickState::Idle);
    }

    #[tokio::test]
    async fn test_full_book_skips_scan() {
        let mut config = test_config();
        config.trading.max_positions = 1;
        let mut h = harness(&config, vec![observation("b", 1.0)], false);
        h.engine
            .lock()
            .await
            .open(&observation("a", 1.0), 90, Utc::now())
            .unwrap();
        h.prices.set("a", 1.1).await;

        let report = h.scheduler.tick().await;
        assert!(report.opened.is_none());
        assert_eq!(report.observed, 0);
        assert_eq!(h.engine.lock().await.stats().scanned_tokens, 0);
    }

    #[tokio::test]
    async fn test_persistence_is_throttled() {
        let mut config = test_config();
        config.scheduler.persist_interval_secs = 3600;
        let mut h = harness(&config, vec![observation("a", 1.0), observation("b", 1.0)], false);

        // First change is saved right away
        assert!(h.scheduler.tick().await.persisted);
        let saved = h.store.load().await.unwrap().unwrap();
        assert_eq!(saved.positions.len(), 1);

        h.prices.set("a", 1.1).await;
        assert!(!h.scheduler.tick().await.persisted);
        let saved = h.store.load().await.unwrap().unwrap();
        assert_eq!(saved.positions.len(), 1);

        h.scheduler.flush().await.unwrap();
        let saved = h.store.load().await.unwrap().unwrap();
        assert_eq!(saved.positions.len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_ticks_and_flushes() {
        let config = test_config();
        let mut h = harness(&config, vec![observation("a", 1.0)], false);

        h.scheduler
            .run(CancellationToken::new(), Some(3))
            .await
            .unwrap();

        assert_eq!(h.scheduler.ticks(), 3);
        let saved = h.store.load().await.unwrap().unwrap();
        assert_eq!(saved.positions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_flushes() {
        let config = test_config();
        let mut h = harness(&config, vec![observation("a", 1.0)], false);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        h.scheduler.run(shutdown, None).await.unwrap();

        assert_eq!(h.scheduler.ticks(), 0);
        assert!(h.store.load().await.unwrap().is_some());
    }
}
