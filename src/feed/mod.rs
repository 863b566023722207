//! Token discovery and price collaborators
//!
//! Every feed normalizes its raw data into a [`TokenObservation`] at the
//! boundary, so the engine never branches on which API produced it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod dexscreener;
pub mod simulation;

pub use dexscreener::DexScreenerFeed;
pub use simulation::SimulatedMarket;

/// A discovered token/pair, normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenObservation {
    /// Unique pair id (dedup key)
    pub pair_id: String,
    /// Base token address
    pub token_address: String,
    pub symbol: String,
    pub name: String,
    /// Price in quote currency (USD)
    pub price: f64,
    #[serde(default)]
    pub liquidity_usd: f64,
    #[serde(default)]
    pub volume_24h_usd: f64,
    /// Signed percentage
    #[serde(default)]
    pub price_change_1h: Option<f64>,
    /// Signed percentage
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    /// Seconds since pair creation
    #[serde(default)]
    pub age_seconds: Option<u64>,
}

impl TokenObservation {
    /// Best of the 1h and 24h price change, if either is known
    pub fn best_price_change(&self) -> Option<f64> {
        let candidates = [self.price_change_1h, self.price_change_24h];
        candidates
            .into_iter()
            .flatten()
            .filter(|c| c.is_finite())
            .reduce(f64::max)
    }

    /// Whether the price can be traded at
    pub fn has_valid_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Source of candidate tokens, queried once per tick
#[async_trait]
pub trait TokenFeed: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Fetch the current batch of observations (may be empty)
    async fn fetch_observations(&self) -> Result<Vec<TokenObservation>>;
}

/// Source of current prices for held pairs
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the latest price for a pair
    async fn fetch_price(&self, pair_id: &str) -> Result<f64>;
}
