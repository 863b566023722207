//! Simulated market
//!
//! Lists a few random tokens per scan and random-walks the price of every
//! listed pair on each quote. Seedable for reproducible runs.

use async_trait::async_trait;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::feed::{PriceSource, TokenFeed, TokenObservation};

/// New tokens listed per scan
const LISTINGS_PER_SCAN: usize = 3;
/// Unquoted pairs kept before the oldest are delisted
const MAX_UNQUOTED_PAIRS: usize = 300;
/// Chance per quote that a pair collapses
const RUG_PROBABILITY: f64 = 0.005;
const MIN_PRICE: f64 = 1e-12;

const NAME_PREFIXES: &[&str] = &[
    "Moon", "Doge", "Pepe", "Shiba", "Turbo", "Based", "Giga", "Baby", "Space", "Chad",
];
const NAME_SUFFIXES: &[&str] = &[
    "Inu", "Cat", "Frog", "Rocket", "Coin", "King", "Wif Hat", "AI", "Bonk", "Mars",
];

struct SimPair {
    observation: TokenObservation,
    /// Mean step per quote
    drift: f64,
    /// Half-width of the uniform step
    volatility: f64,
    quoted: bool,
    listing: u64,
}

struct MarketState {
    rng: StdRng,
    pairs: HashMap<String, SimPair>,
    next_listing: u64,
}

impl MarketState {
    fn list_token(&mut self) -> TokenObservation {
        let rng = &mut self.rng;
        let listing = self.next_listing;
        self.next_listing += 1;

        let symbol: String = (0..rng.gen_range(3..=5))
            .map(|_| rng.gen_range(b'A'..=b'Z') as char)
            .collect();
        let name = format!(
            "{} {}",
            NAME_PREFIXES[rng.gen_range(0..NAME_PREFIXES.len())],
            NAME_SUFFIXES[rng.gen_range(0..NAME_SUFFIXES.len())]
        );

        let observation = TokenObservation {
            pair_id: format!("SIM{:06}", listing),
            token_address: format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>()),
            symbol,
            name,
            price: 10f64.powf(rng.gen_range(-8.0..-2.0)),
            liquidity_usd: rng.gen_range(200.0..100_000.0),
            volume_24h_usd: rng.gen_range(500.0..300_000.0),
            price_change_1h: Some(rng.gen_range(-30.0..120.0)),
            price_change_24h: if rng.gen_bool(0.8) {
                Some(rng.gen_range(-50.0..400.0))
            } else {
                None
            },
            age_seconds: Some(rng.gen_range(0..7_200)),
        };

        let pair = SimPair {
            observation: observation.clone(),
            drift: rng.gen_range(-0.01..0.015),
            volatility: rng.gen_range(0.02..0.12),
            quoted: false,
            listing,
        };
        self.pairs.insert(observation.pair_id.clone(), pair);
        observation
    }

    /// Drop the oldest pairs nobody has asked a price for
    fn delist_stale(&mut self) {
        let mut unquoted: Vec<(u64, String)> = self
            .pairs
            .iter()
            .filter(|(_, p)| !p.quoted)
            .map(|(id, p)| (p.listing, id.clone()))
            .collect();
        if unquoted.len() <= MAX_UNQUOTED_PAIRS {
            return;
        }
        unquoted.sort();
        let excess = unquoted.len() - MAX_UNQUOTED_PAIRS;
        for (_, id) in unquoted.into_iter().take(excess) {
            self.pairs.remove(&id);
        }
    }
}

/// Random token discovery and random-walk prices
pub struct SimulatedMarket {
    state: Mutex<MarketState>,
}

impl SimulatedMarket {
    /// Seeded market, or random when `seed` is `None`
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            state: Mutex::new(MarketState {
                rng,
                pairs: HashMap::new(),
                next_listing: 0,
            }),
        }
    }

    /// Pairs currently listed
    pub async fn listed(&self) -> usize {
        self.state.lock().await.pairs.len()
    }
}

#[async_trait]
impl TokenFeed for SimulatedMarket {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn fetch_observations(&self) -> Result<Vec<TokenObservation>> {
        let mut state = self.state.lock().await;
        let observations: Vec<TokenObservation> =
            (0..LISTINGS_PER_SCAN).map(|_| state.list_token()).collect();
        state.delist_stale();
        Ok(observations)
    }
}

#[async_trait]
impl PriceSource for SimulatedMarket {
    async fn fetch_price(&self, pair_id: &str) -> Result<f64> {
        let mut state = self.state.lock().await;
        let MarketState { rng, pairs, .. } = &mut *state;

        let pair = pairs.get_mut(pair_id).ok_or_else(|| Error::PriceUnavailable {
            pair_id: pair_id.to_string(),
            reason: "not listed".into(),
        })?;

        let mut factor = 1.0 + pair.drift + rng.gen_range(-1.0..=1.0) * pair.volatility;
        if rng.gen_bool(RUG_PROBABILITY) {
            debug!("Simulated rug on {}", pair_id);
            factor = rng.gen_range(0.02..0.2);
        }

        let price = (pair.observation.price * factor).max(MIN_PRICE);
        pair.observation.price = price;
        pair.quoted = true;
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_market_is_reproducible() {
        let a = SimulatedMarket::new(Some(7));
        let b = SimulatedMarket::new(Some(7));

        let first = a.fetch_observations().await.unwrap();
        assert_eq!(first, b.fetch_observations().await.unwrap());
        assert_eq!(first.len(), LISTINGS_PER_SCAN);

        let pair = &first[0].pair_id;
        for _ in 0..20 {
            assert_eq!(
                a.fetch_price(pair).await.unwrap(),
                b.fetch_price(pair).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_listings_are_well_formed() {
        let market = SimulatedMarket::new(Some(1));
        for _ in 0..10 {
            for obs in market.fetch_observations().await.unwrap() {
                assert!(obs.has_valid_price());
                assert!(obs.liquidity_usd >= 200.0);
                assert!((3..=5).contains(&obs.symbol.len()));
                assert!(obs.age_seconds.unwrap() < 7_200);
            }
        }
        assert_eq!(market.listed().await, 30);
    }

    #[tokio::test]
    async fn test_prices_stay_positive() {
        let market = SimulatedMarket::new(Some(99));
        let pair = market.fetch_observations().await.unwrap()[0].pair_id.clone();

        for _ in 0..2_000 {
            let price = market.fetch_price(&pair).await.unwrap();
            assert!(price.is_finite() && price > 0.0);
        }
    }

    #[tokio::test]
    async fn test_unknown_pair_is_unavailable() {
        let market = SimulatedMarket::new(Some(3));
        let err = market.fetch_price("nope").await.unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_quoted_pairs_survive_delisting() {
        let market = SimulatedMarket::new(Some(5));
        let held = market.fetch_observations().await.unwrap()[0].pair_id.clone();
        market.fetch_price(&held).await.unwrap();

        for _ in 0..(MAX_UNQUOTED_PAIRS / LISTINGS_PER_SCAN + 10) {
            market.fetch_observations().await.unwrap();
        }

        assert!(market.listed().await <= MAX_UNQUOTED_PAIRS + 1);
        assert!(market.fetch_price(&held).await.is_ok());
    }
}
