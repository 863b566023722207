//! Trading engine
//!
//! Owns the scorer, position book, exit evaluator and ledger for one run.
//! All state changes go through here; the scheduler drives it one tick at a
//! time behind a [`SharedEngine`] handle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::TokenObservation;
use crate::filter::{ScoreResult, Scorer, ScoringContext};
use crate::ledger::{Ledger, Stats, Trade};
use crate::persistence::Snapshot;
use crate::position::{ExitEvaluator, ExitReason, Position, PositionBook};

/// Engine handle shared by the scheduler and reporting
pub type SharedEngine = Arc<Mutex<TradingEngine>>;

/// Highest-scoring eligible observation of a batch
#[derive(Debug, Clone)]
pub struct Candidate {
    pub observation: TokenObservation,
    pub score: ScoreResult,
}

pub struct TradingEngine {
    scorer: Scorer,
    book: PositionBook,
    exits: ExitEvaluator,
    ledger: Ledger,
    scan_limit: usize,
    reentry_cooldown_secs: u64,
    /// Set by every mutation, cleared by `take_changes`
    changed: bool,
}

impl TradingEngine {
    pub fn new(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            scorer: Scorer::new(config.scoring.clone())?,
            book: PositionBook::new(config.trading.clone(), config.fees.clone()),
            exits: ExitEvaluator::new(config.exits.clone()),
            ledger: Ledger::new(config.trading.initial_capital_usd, now),
            scan_limit: config.feed.scan_limit,
            reentry_cooldown_secs: config.scoring.reentry_cooldown_secs,
            changed: false,
        })
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    /// Score one observation against the current book and history
    pub fn score(&self, observation: &TokenObservation, now: DateTime<Utc>) -> ScoreResult {
        let context = ScoringContext {
            already_held: self.book.holds_pair(&observation.pair_id),
            recently_traded: self.ledger.traded_within(
                &observation.pair_id,
                self.reentry_cooldown_secs,
                now,
            ),
        };
        self.scorer.evaluate(observation, context)
    }

    /// Whether another position fits the count and capital limits
    pub fn has_room(&self) -> bool {
        self.book.has_room(self.ledger.stats())
    }

    pub fn can_open(&self, observation: &TokenObservation) -> bool {
        self.book.can_open(observation, self.ledger.stats())
    }

    /// Score up to `scan_limit` observations and pick the best buy
    ///
    /// Ties go to the observation seen first.
    pub fn select_candidate(
        &mut self,
        observations: &[TokenObservation],
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        self.ledger.prune_cooldowns(self.reentry_cooldown_secs, now);
        let batch = &observations[..observations.len().min(self.scan_limit)];
        self.ledger.record_scan(batch.len());
        if !batch.is_empty() {
            self.changed = true;
        }

        let mut best: Option<Candidate> = None;
        for observation in batch {
            let score = self.score(observation, now);
            debug!(
                "{} ({}) {}",
                observation.name,
                observation.pair_id,
                score.summary()
            );
            if !score.should_buy {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |b| score.total_score > b.score.total_score);
            if better {
                best = Some(Candidate {
                    observation: observation.clone(),
                    score,
                });
            }
        }
        best
    }

    pub fn open(
        &mut self,
        observation: &TokenObservation,
        entry_score: u32,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let position = self.book.open(observation, entry_score, &mut self.ledger, now)?;
        self.changed = true;
        Ok(position)
    }

    pub fn close(
        &mut self,
        position_id: &str,
        exit_price: f64,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Trade> {
        let trade = self
            .book
            .close(position_id, exit_price, exit_reason, &mut self.ledger, now)?;
        self.changed = true;
        Ok(trade)
    }

    /// Apply a fetched price to one position and close it if a rule fires
    pub fn check_position(
        &mut self,
        position_id: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Trade>> {
        let position = self
            .book
            .get_mut(position_id)
            .ok_or_else(|| Error::PositionNotFound(position_id.to_string()))?;

        let decision = self.exits.evaluate(position, price, 1)?;
        self.changed = true;

        match decision {
            Some(decision) => {
                debug!(
                    "Exit {} for {}: pnl {:.1}%, {:.1}% off peak",
                    decision.reason,
                    decision.position_id,
                    decision.unrealized_profit_pct * 100.0,
                    decision.drop_from_peak_pct * 100.0
                );
                let trade = self.close(position_id, decision.price, decision.reason, now)?;
                Ok(Some(trade))
            }
            None => Ok(None),
        }
    }

    /// (position id, pair id) of every open position
    pub fn watch_list(&self) -> Vec<(String, String)> {
        self.book.watch_list()
    }

    pub fn stats(&self) -> &Stats {
        self.ledger.stats()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.book.positions()
    }

    pub fn open_count(&self) -> usize {
        self.book.len()
    }

    /// Capital committed to open positions, fees excluded
    pub fn open_exposure(&self) -> f64 {
        self.book.total_invested()
    }

    /// Mark-to-market P&L of open positions at their last seen price
    pub fn unrealized_pnl(&self) -> f64 {
        self.book.total_unrealized_pnl()
    }

    /// Up to `limit` trades, newest first
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.ledger.recent_trades(limit)
    }

    pub fn trades(&self) -> &[Trade] {
        self.ledger.trades()
    }

    /// Whether state changed since the last call
    pub fn take_changes(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Flag state as unsaved again, e.g. after a failed write
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Full state, with the trade history capped to the last `trade_limit`
    pub fn snapshot(&self, trade_limit: usize, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            saved_at: now,
            stats: self.ledger.stats().clone(),
            positions: self.book.positions(),
            trades: self.ledger.tail(trade_limit).to_vec(),
        }
    }

    /// Load a snapshot at startup
    pub fn restore(&mut self, snapshot: Snapshot) {
        info!(
            "Restoring state saved {}: {} open positions, {} trades, capital ${:.4}",
            snapshot.saved_at,
            snapshot.positions.len(),
            snapshot.stats.total_trades,
            snapshot.stats.capital
        );
        self.book.restore(snapshot.positions);
        self.ledger.restore(snapshot.stats, snapshot.trades);
        self.changed = false;
    }
}
