//! Exit rules for open positions
//!
//! Each tick a position's tracking fields are updated with the latest price,
//! then the rules are checked in fixed precedence: take-profit, stop-loss,
//! trailing stop, time exit. The first match wins.
//!
//! WARNING: exits are best-effort. A price that gaps between two ticks is
//! only seen at the next tick, so realized P&L can overshoot the thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::position::manager::Position;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Pullback from peak while still in profit
    TrailingStop,
    /// Stale position with a small gain
    TimeExit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "take-profit"),
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TrailingStop => write!(f, "trailing-stop"),
            ExitReason::TimeExit => write!(f, "time-exit"),
        }
    }
}

/// Exit thresholds, as fractions (0.5 = 50%)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    /// Retracement from peak that fires the trailing stop
    #[serde(default = "default_trailing_drop")]
    pub trailing_drop_pct: f64,
    /// Trailing stop only fires above this profit
    #[serde(default = "default_trailing_min_lock")]
    pub trailing_min_lock_pct: f64,
    /// Checks before a time exit is considered
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,
    /// Time exit only fires above this profit
    #[serde(default)]
    pub time_exit_min_profit_pct: f64,
}

fn default_take_profit() -> f64 {
    0.5
}

fn default_stop_loss() -> f64 {
    0.2
}

fn default_trailing_drop() -> f64 {
    0.15
}

fn default_trailing_min_lock() -> f64 {
    0.05
}

fn default_max_checks() -> u32 {
    600
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: default_take_profit(),
            stop_loss_pct: default_stop_loss(),
            trailing_drop_pct: default_trailing_drop(),
            trailing_min_lock_pct: default_trailing_min_lock(),
            max_checks: default_max_checks(),
            time_exit_min_profit_pct: 0.0,
        }
    }
}

/// A fired exit rule
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub position_id: String,
    pub reason: ExitReason,
    /// Price the rule fired at
    pub price: f64,
    pub unrealized_profit_pct: f64,
    pub drop_from_peak_pct: f64,
}

/// Evaluates exit rules against open positions
#[derive(Debug, Clone, Default)]
pub struct ExitEvaluator {
    config: ExitConfig,
}

impl ExitEvaluator {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Track the new price, then check exit rules
    ///
    /// A non-positive or non-finite price is `PriceUnavailable` and leaves
    /// the position untouched.
    pub fn evaluate(
        &self,
        position: &mut Position,
        current_price: f64,
        check_increment: u32,
    ) -> Result<Option<ExitDecision>> {
        if !(current_price.is_finite() && current_price > 0.0) {
            return Err(Error::PriceUnavailable {
                pair_id: position.pair_id.clone(),
                reason: format!("unusable price {}", current_price),
            });
        }

        position.track_price(current_price, check_increment);

        Ok(Self::check_triggers(&self.config, position).map(|reason| ExitDecision {
            position_id: position.id.clone(),
            reason,
            price: current_price,
            unrealized_profit_pct: position.unrealized_profit_pct(),
            drop_from_peak_pct: position.drop_from_peak_pct(),
        }))
    }

    /// First rule that fires for the position's current state
    fn check_triggers(config: &ExitConfig, position: &Position) -> Option<ExitReason> {
        let pnl_pct = position.unrealized_profit_pct();

        if pnl_pct >= config.take_profit_pct {
            return Some(ExitReason::TakeProfit);
        }

        if pnl_pct <= -config.stop_loss_pct {
            return Some(ExitReason::StopLoss);
        }

        if position.drop_from_peak_pct() > config.trailing_drop_pct
            && pnl_pct > config.trailing_min_lock_pct
        {
            return Some(ExitReason::TrailingStop);
        }

        if position.check_count >= config.max_checks && pnl_pct > config.time_exit_min_profit_pct {
            return Some(ExitReason::TimeExit);
        }

        None
    }
}
