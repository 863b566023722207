//! Position management
//!
//! Owns the open positions, enforces capital and position-count limits and
//! is the only path that turns a position into a realized [`Trade`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{FeeConfig, TradingConfig};
use crate::error::{Error, Result};
use crate::feed::TokenObservation;
use crate::ledger::{Ledger, Stats, Trade};
use crate::position::exit::ExitReason;

/// A single virtual position in a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pair_id: String,
    /// Base token address
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    /// Entry price in USD per token
    pub buy_price: f64,
    /// Tokens held (invested_amount / buy_price)
    pub quantity: f64,
    /// Capital committed, excluding fees
    pub invested_amount: f64,
    /// Buy fee, plus the sell fee once closed
    pub fees_accrued: f64,
    pub buy_timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub highest_price_seen: f64,
    pub lowest_price_seen: f64,
    /// Ticks this position has been evaluated
    pub check_count: u32,
    /// Score at entry
    #[serde(default)]
    pub entry_score: u32,
}

impl Position {
    /// Build a position for `invested` USD of the observed pair
    pub fn open(
        observation: &TokenObservation,
        invested: f64,
        buy_fee: f64,
        entry_score: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let price = observation.price;
        Self {
            id: Self::generate_id(now),
            pair_id: observation.pair_id.clone(),
            token_address: observation.token_address.clone(),
            symbol: observation.symbol.clone(),
            name: observation.name.clone(),
            buy_price: price,
            quantity: invested / price,
            invested_amount: invested,
            fees_accrued: buy_fee,
            buy_timestamp: now,
            current_price: price,
            highest_price_seen: price,
            lowest_price_seen: price,
            check_count: 0,
            entry_score,
        }
    }

    /// Time-based id with a random suffix
    fn generate_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("POS_{}_{}", now.timestamp_millis(), &suffix[..12])
    }

    /// Calculate current value in USD
    pub fn current_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    /// Capital plus fees sunk into this position
    pub fn cost_basis(&self) -> f64 {
        self.invested_amount + self.fees_accrued
    }

    /// Calculate unrealized P&L in USD, net of fees so far
    pub fn unrealized_pnl(&self) -> f64 {
        self.current_value() - self.cost_basis()
    }

    /// Unrealized P&L as a fraction of cost basis (0.5 = +50%)
    pub fn unrealized_profit_pct(&self) -> f64 {
        let basis = self.cost_basis();
        if basis == 0.0 {
            return 0.0;
        }
        self.unrealized_pnl() / basis
    }

    /// Fractional retracement from the highest price seen
    pub fn drop_from_peak_pct(&self) -> f64 {
        if self.highest_price_seen <= 0.0 {
            return 0.0;
        }
        (self.highest_price_seen - self.current_price) / self.highest_price_seen
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.buy_timestamp).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Apply a new price to the tracking fields
    pub fn track_price(&mut self, price: f64, check_increment: u32) {
        self.current_price = price;
        if price > self.highest_price_seen {
            self.highest_price_seen = price;
        }
        if price < self.lowest_price_seen {
            self.lowest_price_seen = price;
        }
        self.check_count = self.check_count.saturating_add(check_increment);
    }
}

/// Book of open positions
#[derive(Debug)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
    trading: TradingConfig,
    fees: FeeConfig,
}

impl PositionBook {
    pub fn new(trading: TradingConfig, fees: FeeConfig) -> Self {
        Self {
            positions: HashMap::new(),
            trading,
            fees,
        }
    }

    /// Capital needed to open one position, fee included
    pub fn required_capital(&self) -> f64 {
        self.trading.position_size_usd + self.fees.buy_fee(self.trading.position_size_usd)
    }

    /// Whether another position fits the limits
    pub fn has_room(&self, stats: &Stats) -> bool {
        self.positions.len() < self.trading.max_positions
            && stats.capital >= self.required_capital()
    }

    /// Whether this observation could be opened right now
    pub fn can_open(&self, observation: &TokenObservation, stats: &Stats) -> bool {
        !self.holds_pair(&observation.pair_id) && self.has_room(stats)
    }

    /// Open a position, charging capital and buy fee through the ledger
    pub fn open(
        &mut self,
        observation: &TokenObservation,
        entry_score: u32,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        if !observation.has_valid_price() {
            return Err(Error::InvalidPrice {
                pair_id: observation.pair_id.clone(),
                price: observation.price,
            });
        }

        if self.holds_pair(&observation.pair_id) {
            return Err(Error::AlreadyHeld(observation.pair_id.clone()));
        }

        if self.positions.len() >= self.trading.max_positions {
            return Err(Error::PositionLimitReached {
                max: self.trading.max_positions,
            });
        }

        // Re-checked here: capital may have moved since can_open
        let invested = self.trading.position_size_usd;
        let buy_fee = self.fees.buy_fee(invested);
        let available = ledger.stats().capital;
        if available < invested + buy_fee {
            return Err(Error::InsufficientCapital {
                available,
                required: invested + buy_fee,
            });
        }

        let position = Position::open(observation, invested, buy_fee, entry_score, now);
        ledger.record_open(&position);
        self.positions.insert(position.id.clone(), position.clone());

        info!(
            "Opened {} ({}) at ${:.8}: {:.2} tokens for ${:.2} (fee ${:.4})",
            position.name,
            position.symbol,
            position.buy_price,
            position.quantity,
            position.invested_amount,
            buy_fee
        );

        Ok(position)
    }

    /// Close a position in full and record the trade
    pub fn close(
        &mut self,
        position_id: &str,
        exit_price: f64,
        exit_reason: ExitReason,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<Trade> {
        let position = self
            .positions
            .get(position_id)
            .ok_or_else(|| Error::PositionNotFound(position_id.to_string()))?;

        if !(exit_price.is_finite() && exit_price > 0.0) {
            return Err(Error::InvalidPrice {
                pair_id: position.pair_id.clone(),
                price: exit_price,
            });
        }

        let mut position = self
            .positions
            .remove(position_id)
            .ok_or_else(|| Error::PositionNotFound(position_id.to_string()))?;

        position.track_price(exit_price, 0);
        let sell_fee = self.fees.sell_fee(position.quantity * exit_price);
        let trade = Trade::from_close(position, exit_price, sell_fee, exit_reason, now);
        ledger.record_close(trade.clone());

        info!(
            "Closed {} ({}) [{}]: ${:.8} -> ${:.8}, net P&L ${:.4} ({:.1}%)",
            trade.position.name,
            trade.position.symbol,
            trade.exit_reason,
            trade.position.buy_price,
            trade.sell_price,
            trade.realized_net_profit,
            trade.profit_pct() * 100.0
        );

        Ok(trade)
    }

    /// Get a position by id
    pub fn get(&self, position_id: &str) -> Option<&Position> {
        self.positions.get(position_id)
    }

    pub fn get_mut(&mut self, position_id: &str) -> Option<&mut Position> {
        self.positions.get_mut(position_id)
    }

    pub fn holds_pair(&self, pair_id: &str) -> bool {
        self.positions.values().any(|p| p.pair_id == pair_id)
    }

    /// All positions, oldest first
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| {
            a.buy_timestamp
                .cmp(&b.buy_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        positions
    }

    /// (position id, pair id) for every open position, oldest first
    pub fn watch_list(&self) -> Vec<(String, String)> {
        self.positions()
            .into_iter()
            .map(|p| (p.id, p.pair_id))
            .collect()
    }

    /// Total capital committed to open positions
    pub fn total_invested(&self) -> f64 {
        self.positions.values().map(|p| p.invested_amount).sum()
    }

    /// Get total unrealized P&L
    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl()).sum()
    }

    /// Get position count
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Replace the open set with restored positions
    pub fn restore(&mut self, positions: Vec<Position>) {
        self.positions = positions.into_iter().map(|p| (p.id.clone(), p)).collect();
        debug!("Restored {} open positions", self.positions.len());
    }
}
