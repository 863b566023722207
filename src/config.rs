//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Re-export component configs
pub use crate::filter::scoring::{ScoringConfig, Tier};
pub use crate::position::exit::ExitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub exits: ExitConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Starting virtual capital (USD)
    #[serde(default = "default_initial_capital")]
    pub initial_capital_usd: f64,
    /// Capital committed per position, excluding fees
    #[serde(default = "default_position_size")]
    pub position_size_usd: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_capital_usd: default_initial_capital(),
            position_size_usd: default_position_size(),
            max_positions: default_max_positions(),
        }
    }
}

/// Which legs of a round trip pay the swap fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    SellOnly,
    BothLegs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Swap fee as a fraction of notional (0.003 = 0.3%)
    #[serde(default = "default_swap_fee")]
    pub swap_fee_pct: f64,
    #[serde(default = "default_fee_mode")]
    pub mode: FeeMode,
}

impl FeeConfig {
    /// Fee charged when buying `invested` worth of a token
    pub fn buy_fee(&self, invested: f64) -> f64 {
        match self.mode {
            FeeMode::BothLegs => invested * self.swap_fee_pct,
            FeeMode::SellOnly => 0.0,
        }
    }

    /// Fee charged when selling for `proceeds`
    pub fn sell_fee(&self, proceeds: f64) -> f64 {
        proceeds.max(0.0) * self.swap_fee_pct
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            swap_fee_pct: default_swap_fee(),
            mode: default_fee_mode(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    /// Random token discovery and random-walk prices
    Simulated,
    /// DexScreener latest profiles and pair lookups
    Dexscreener,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_source")]
    pub source: FeedSource,
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    /// Max observations scored per tick
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// Per-call timeout for feed and price lookups
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Profiles resolved per DexScreener scan
    #[serde(default = "default_profile_limit")]
    pub profile_limit: usize,
    /// Seed for the simulated market (random when unset)
    #[serde(default)]
    pub simulation_seed: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: default_feed_source(),
            chain_id: default_chain_id(),
            scan_limit: default_scan_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            profile_limit: default_profile_limit(),
            simulation_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Minimum seconds between snapshot writes
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
    /// Seconds between summary log lines
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            persist_interval_secs: default_persist_interval_secs(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_snapshot_path")]
    pub path: String,
    /// Most recent trades kept in the snapshot
    #[serde(default = "default_trade_history_limit")]
    pub trade_history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            trade_history_limit: default_trade_history_limit(),
        }
    }
}

// Default value functions
fn default_initial_capital() -> f64 {
    10.0
}

fn default_position_size() -> f64 {
    1.0
}

fn default_max_positions() -> usize {
    5
}

fn default_swap_fee() -> f64 {
    0.0025
}

fn default_fee_mode() -> FeeMode {
    FeeMode::BothLegs
}

fn default_feed_source() -> FeedSource {
    FeedSource::Simulated
}

fn default_chain_id() -> String {
    "solana".into()
}

fn default_scan_limit() -> usize {
    20
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_profile_limit() -> usize {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_report_interval_secs() -> u64 {
    3600
}

fn default_snapshot_path() -> String {
    std::env::var("TRADING_DATA_PATH").unwrap_or_else(|_| "trading_data.json".into())
}

fn default_trade_history_limit() -> usize {
    1000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TRADER_)
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Trading amounts
        if self.trading.initial_capital_usd <= 0.0 {
            anyhow::bail!("initial_capital_usd must be positive");
        }
        if self.trading.position_size_usd <= 0.0 {
            anyhow::bail!("position_size_usd must be positive");
        }
        if self.trading.max_positions == 0 {
            anyhow::bail!("max_positions must be at least 1");
        }

        if !(0.0..1.0).contains(&self.fees.swap_fee_pct) {
            anyhow::bail!("swap_fee_pct must be in [0, 1)");
        }

        // Exit thresholds (fractions, 0.5 = 50%)
        if self.exits.take_profit_pct <= 0.0 {
            anyhow::bail!("take_profit_pct must be positive");
        }
        if self.exits.stop_loss_pct <= 0.0 || self.exits.stop_loss_pct >= 1.0 {
            anyhow::bail!("stop_loss_pct must be between 0 and 1");
        }
        if self.exits.trailing_drop_pct <= 0.0 || self.exits.trailing_drop_pct >= 1.0 {
            anyhow::bail!("trailing_drop_pct must be between 0 and 1");
        }

        self.scoring.validate()?;

        // Validate blocked patterns (compile regex to check)
        for pattern in &self.scoring.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked_pattern regex: {}", pattern))?;
        }

        if self.feed.scan_limit == 0 {
            anyhow::bail!("scan_limit must be at least 1");
        }
        if self.scheduler.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be positive");
        }

        Ok(())
    }

    /// Get configuration for display
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Trading:
    initial_capital: ${}
    position_size: ${}
    max_positions: {}
  Fees:
    swap_fee: {}%
    mode: {:?}
  Scoring:
    min_score: {}
    min_liquidity: ${}
    min_volume: ${}
    max_age: {}s
    reentry_cooldown: {}s
    blocked_patterns: {}
  Exits:
    take_profit: {}%
    stop_loss: {}%
    trailing: drop {}% with min lock {}%
    time_exit: after {} checks above {}%
  Feed:
    source: {:?}
    chain: {}
    scan_limit: {}
    timeout: {}ms
  Scheduler:
    tick: {}ms
    persist_every: {}s
  Persistence:
    path: {}
    trade_history_limit: {}
"#,
            self.trading.initial_capital_usd,
            self.trading.position_size_usd,
            self.trading.max_positions,
            self.fees.swap_fee_pct * 100.0,
            self.fees.mode,
            self.scoring.min_score,
            self.scoring.min_liquidity_usd,
            self.scoring.min_volume_usd,
            self.scoring.max_age_secs,
            self.scoring.reentry_cooldown_secs,
            self.scoring.blocked_patterns.len(),
            self.exits.take_profit_pct * 100.0,
            self.exits.stop_loss_pct * 100.0,
            self.exits.trailing_drop_pct * 100.0,
            self.exits.trailing_min_lock_pct * 100.0,
            self.exits.max_checks,
            self.exits.time_exit_min_profit_pct * 100.0,
            self.feed.source,
            self.feed.chain_id,
            self.feed.scan_limit,
            self.feed.request_timeout_ms,
            self.scheduler.tick_interval_ms,
            self.scheduler.persist_interval_secs,
            self.persistence.path,
            self.persistence.trade_history_limit,
        )
    }
}
