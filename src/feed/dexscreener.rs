//! DexScreener token discovery and pair prices
//!
//! Discovery reads the latest token profiles for one chain, resolves them to
//! pairs in a single batched lookup and keeps the most liquid pair per token.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::feed::{PriceSource, TokenFeed, TokenObservation};

const DEXSCREENER_BASE: &str = "https://api.dexscreener.com";

/// Max addresses per batched token lookup
const MAX_BATCH: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenProfile {
    pub url: Option<String>,
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub h1: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseToken {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    pub price_change: Option<PriceChange>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
    /// Creation time, unix millis
    #[serde(rename = "pairCreatedAt")]
    pub pair_created_at: Option<i64>,
}

impl DexPair {
    pub fn price(&self) -> Option<f64> {
        self.price_usd.as_ref().and_then(|p| p.parse::<f64>().ok())
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    /// Normalize into an observation as of `now_ms`
    ///
    /// An unparseable price becomes 0, which the scorer rejects.
    pub fn to_observation(&self, now_ms: i64) -> TokenObservation {
        let change = self.price_change.clone().unwrap_or_default();
        let age_seconds = self
            .pair_created_at
            .filter(|created| *created <= now_ms)
            .map(|created| ((now_ms - created) / 1000) as u64);

        TokenObservation {
            pair_id: self.pair_address.clone(),
            token_address: self.base_token.address.clone(),
            symbol: self
                .base_token
                .symbol
                .clone()
                .unwrap_or_else(|| "???".to_string()),
            name: self
                .base_token
                .name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            price: self.price().unwrap_or(0.0),
            liquidity_usd: self.liquidity_usd(),
            volume_24h_usd: self.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
            price_change_1h: change.h1,
            price_change_24h: change.h24,
            age_seconds,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairsResponse {
    pub pairs: Option<Vec<DexPair>>,
    pub pair: Option<DexPair>,
}

impl PairsResponse {
    fn into_first(self) -> Option<DexPair> {
        self.pair
            .or_else(|| self.pairs.and_then(|pairs| pairs.into_iter().next()))
    }
}

/// Most liquid pair per base token, in first-seen token order
pub fn best_pairs(pairs: Vec<DexPair>) -> Vec<DexPair> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, DexPair> = HashMap::new();

    for pair in pairs {
        let token = pair.base_token.address.clone();
        match best.get(&token) {
            Some(current) if current.liquidity_usd() >= pair.liquidity_usd() => {}
            Some(_) => {
                best.insert(token, pair);
            }
            None => {
                order.push(token.clone());
                best.insert(token, pair);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|token| best.remove(&token))
        .collect()
}

/// Live DexScreener feed and price source for one chain
pub struct DexScreenerFeed {
    client: reqwest::Client,
    base_url: String,
    chain_id: String,
    profile_limit: usize,
}

impl DexScreenerFeed {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEXSCREENER_BASE.to_string(),
            chain_id: config.chain_id.clone(),
            profile_limit: config.profile_limit.min(MAX_BATCH),
        })
    }

    /// Fetch latest token profiles
    pub async fn get_latest_profiles(&self) -> Result<Vec<TokenProfile>> {
        let url = format!("{}/token-profiles/latest/v1", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let profiles: Vec<TokenProfile> = resp.json().await?;
        Ok(profiles)
    }

    /// Fetch every pair of up to 30 tokens in one request
    pub async fn get_token_pairs(&self, token_addresses: &[String]) -> Result<Vec<DexPair>> {
        if token_addresses.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/tokens/v1/{}/{}",
            self.base_url,
            self.chain_id,
            token_addresses.join(",")
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let pairs: Vec<DexPair> = resp.json().await?;
        Ok(pairs)
    }

    /// Fetch one pair by address
    pub async fn get_pair(&self, pair_id: &str) -> Result<Option<DexPair>> {
        let url = format!(
            "{}/latest/dex/pairs/{}/{}",
            self.base_url, self.chain_id, pair_id
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let data: PairsResponse = resp.json().await?;
        Ok(data.into_first())
    }
}

#[async_trait]
impl TokenFeed for DexScreenerFeed {
    fn name(&self) -> &str {
        "dexscreener"
    }

    async fn fetch_observations(&self) -> Result<Vec<TokenObservation>> {
        let profiles = self.get_latest_profiles().await?;

        let mut seen = HashSet::new();
        let addresses: Vec<String> = profiles
            .into_iter()
            .filter(|p| p.chain_id == self.chain_id)
            .map(|p| p.token_address)
            .filter(|address| seen.insert(address.clone()))
            .take(self.profile_limit)
            .collect();

        debug!(
            "Resolving {} {} profiles from DexScreener",
            addresses.len(),
            self.chain_id
        );

        let pairs = self.get_token_pairs(&addresses).await?;
        let now_ms = Utc::now().timestamp_millis();
        let observations: Vec<TokenObservation> = best_pairs(pairs)
            .iter()
            .map(|pair| pair.to_observation(now_ms))
            .collect();

        info!("DexScreener returned {} observations", observations.len());
        Ok(observations)
    }
}

#[async_trait]
impl PriceSource for DexScreenerFeed {
    async fn fetch_price(&self, pair_id: &str) -> Result<f64> {
        let unavailable = |reason: String| Error::PriceUnavailable {
            pair_id: pair_id.to_string(),
            reason,
        };

        let pair = self
            .get_pair(pair_id)
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .ok_or_else(|| unavailable("pair not found".into()))?;

        pair.price()
            .ok_or_else(|| unavailable("no USD price".into()))
    }
}
