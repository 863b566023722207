//! Realized trades and the running stats aggregate
//!
//! The ledger is the only writer of [`Stats`]. Opens charge capital and the
//! buy fee, closes credit proceeds and update every realized counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::position::exit::ExitReason;
use crate::position::manager::Position;

/// Win iff realized net profit is strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
}

/// A closed position with its realized result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Position as it was at close, sell fee included in `fees_accrued`
    #[serde(flatten)]
    pub position: Position,
    pub sell_price: f64,
    pub sell_fee: f64,
    pub sell_timestamp: DateTime<Utc>,
    /// quantity * sell_price - invested_amount
    pub realized_gross_profit: f64,
    /// Gross profit minus all fees
    pub realized_net_profit: f64,
    pub duration_seconds: f64,
    pub exit_reason: ExitReason,
    pub outcome: TradeOutcome,
}

impl Trade {
    /// Realize a position at `sell_price`
    pub fn from_close(
        mut position: Position,
        sell_price: f64,
        sell_fee: f64,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Self {
        position.fees_accrued += sell_fee;

        let realized_gross_profit = position.quantity * sell_price - position.invested_amount;
        let realized_net_profit = realized_gross_profit - position.fees_accrued;
        let outcome = if realized_net_profit > 0.0 {
            TradeOutcome::Win
        } else {
            TradeOutcome::Loss
        };

        Self {
            duration_seconds: position.age_secs(now),
            position,
            sell_price,
            sell_fee,
            sell_timestamp: now,
            realized_gross_profit,
            realized_net_profit,
            exit_reason,
            outcome,
        }
    }

    /// Net profit as a fraction of invested capital plus fees
    pub fn profit_pct(&self) -> f64 {
        let basis = self.position.cost_basis();
        if basis == 0.0 {
            return 0.0;
        }
        self.realized_net_profit / basis
    }

    pub fn is_win(&self) -> bool {
        self.outcome == TradeOutcome::Win
    }
}

/// Running totals for the whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub initial_capital: f64,
    /// Free capital, not counting open positions
    pub capital: f64,
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_fees: f64,
    /// Sum of gross realized profit
    pub total_realized_profit: f64,
    /// Sum of net realized profit
    pub net_realized_profit: f64,
    pub best_trade: Option<Trade>,
    pub worst_trade: Option<Trade>,
    /// Observations scored so far
    #[serde(default)]
    pub scanned_tokens: u64,
    pub started_at: DateTime<Utc>,
}

impl Stats {
    pub fn new(initial_capital: f64, started_at: DateTime<Utc>) -> Self {
        Self {
            initial_capital,
            capital: initial_capital,
            total_trades: 0,
            wins: 0,
            losses: 0,
            total_fees: 0.0,
            total_realized_profit: 0.0,
            net_realized_profit: 0.0,
            best_trade: None,
            worst_trade: None,
            scanned_tokens: 0,
            started_at,
        }
    }

    /// Wins over closed trades, 0 before the first close
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64
    }

    /// (capital - initial) / initial
    pub fn roi(&self) -> f64 {
        if self.initial_capital == 0.0 {
            return 0.0;
        }
        (self.capital - self.initial_capital) / self.initial_capital
    }
}

/// Stats plus the append-only trade history
#[derive(Debug, Clone)]
pub struct Ledger {
    stats: Stats,
    trades: Vec<Trade>,
    /// Last sell time per pair, for the re-entry cooldown
    last_closed: HashMap<String, DateTime<Utc>>,
}

impl Ledger {
    pub fn new(initial_capital: f64, now: DateTime<Utc>) -> Self {
        Self {
            stats: Stats::new(initial_capital, now),
            trades: Vec::new(),
            last_closed: HashMap::new(),
        }
    }

    /// Charge a new position's capital and buy fee
    pub fn record_open(&mut self, position: &Position) {
        self.stats.capital -= position.invested_amount + position.fees_accrued;
        self.stats.total_fees += position.fees_accrued;
    }

    /// Credit a closed trade's proceeds and update realized totals
    pub fn record_close(&mut self, trade: Trade) {
        let stats = &mut self.stats;

        stats.capital += trade.position.quantity * trade.sell_price - trade.sell_fee;
        stats.total_fees += trade.sell_fee;
        stats.total_realized_profit += trade.realized_gross_profit;
        stats.net_realized_profit += trade.realized_net_profit;
        stats.total_trades += 1;
        match trade.outcome {
            TradeOutcome::Win => stats.wins += 1,
            TradeOutcome::Loss => stats.losses += 1,
        }

        let is_best = stats
            .best_trade
            .as_ref()
            .map_or(true, |best| trade.realized_net_profit > best.realized_net_profit);
        if is_best {
            stats.best_trade = Some(trade.clone());
        }
        let is_worst = stats
            .worst_trade
            .as_ref()
            .map_or(true, |worst| trade.realized_net_profit < worst.realized_net_profit);
        if is_worst {
            stats.worst_trade = Some(trade.clone());
        }

        self.last_closed
            .insert(trade.position.pair_id.clone(), trade.sell_timestamp);
        self.trades.push(trade);
    }

    /// Count observations that were scored
    pub fn record_scan(&mut self, count: usize) {
        self.stats.scanned_tokens += count as u64;
    }

    /// Whether the pair was sold less than `window_secs` ago
    pub fn traded_within(&self, pair_id: &str, window_secs: u64, now: DateTime<Utc>) -> bool {
        if window_secs == 0 {
            return false;
        }
        self.last_closed
            .get(pair_id)
            .map_or(false, |sold| (now - *sold).num_seconds() < window_secs as i64)
    }

    /// Forget sells older than `window_secs`, returns how many were dropped
    pub fn prune_cooldowns(&mut self, window_secs: u64, now: DateTime<Utc>) -> usize {
        let before = self.last_closed.len();
        self.last_closed
            .retain(|_, sold| window_secs > 0 && (now - *sold).num_seconds() < window_secs as i64);
        before - self.last_closed.len()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Full history, oldest first
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Up to `limit` trades, newest first
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(limit).cloned().collect()
    }

    /// Last `limit` trades, oldest first
    pub fn tail(&self, limit: usize) -> &[Trade] {
        let start = self.trades.len().saturating_sub(limit);
        &self.trades[start..]
    }

    /// Replace state with a restored snapshot
    ///
    /// A capped snapshot carries fewer trades than `total_trades`.
    pub fn restore(&mut self, stats: Stats, trades: Vec<Trade>) {
        self.last_closed = trades
            .iter()
            .map(|t| (t.position.pair_id.clone(), t.sell_timestamp))
            .collect();
        debug!(
            "Restored ledger: {} trades in history, {} total, capital ${:.4}",
            trades.len(),
            stats.total_trades,
            stats.capital
        );
        self.stats = stats;
        self.trades = trades;
    }
}
