//! Bucketed scoring of token observations
//!
//! Four independent criteria (liquidity, 24h volume, momentum and age) each
//! map an observation field to points through a step function. The sum is
//! compared against configured thresholds to produce a buy recommendation.
//! Every threshold and tier table lives in [`ScoringConfig`], so deployments
//! differ by configuration only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::feed::TokenObservation;

/// One step of a tier table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Lower bound for value tiers, upper bound for age tiers
    pub threshold: f64,
    pub points: u32,
}

impl Tier {
    pub const fn new(threshold: f64, points: u32) -> Self {
        Self { threshold, points }
    }
}

/// Scoring criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Liquidity,
    Volume,
    Momentum,
    Age,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Liquidity => write!(f, "liquidity"),
            Criterion::Volume => write!(f, "volume"),
            Criterion::Momentum => write!(f, "momentum"),
            Criterion::Age => write!(f, "age"),
        }
    }
}

/// Why an observation is not a buy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Rejection {
    InvalidPrice { price: f64 },
    BelowMinScore { score: u32, min: u32 },
    LowLiquidity { liquidity_usd: f64 },
    LowVolume { volume_usd: f64 },
    TooOld { age_secs: Option<u64> },
    AlreadyHeld,
    RecentlyTraded,
    BlockedName { pattern: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InvalidPrice { price } => write!(f, "invalid price {}", price),
            Rejection::BelowMinScore { score, min } => write!(f, "score {} < {}", score, min),
            Rejection::LowLiquidity { liquidity_usd } => {
                write!(f, "liquidity ${:.0} below minimum", liquidity_usd)
            }
            Rejection::LowVolume { volume_usd } => {
                write!(f, "volume ${:.0} below minimum", volume_usd)
            }
            Rejection::TooOld { age_secs: Some(age) } => write!(f, "age {}s above maximum", age),
            Rejection::TooOld { age_secs: None } => write!(f, "age unknown"),
            Rejection::AlreadyHeld => write!(f, "pair already held"),
            Rejection::RecentlyTraded => write!(f, "pair traded within cooldown"),
            Rejection::BlockedName { pattern } => write!(f, "name matches {}", pattern),
        }
    }
}

/// Scoring thresholds and tier tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_min_volume")]
    pub min_volume_usd: f64,
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    /// A closed pair cannot be bought again for this long (0 = immediately)
    #[serde(default = "default_reentry_cooldown")]
    pub reentry_cooldown_secs: u64,
    /// Awarded when liquidity >= threshold
    #[serde(default = "default_liquidity_tiers")]
    pub liquidity_tiers: Vec<Tier>,
    /// Awarded when 24h volume >= threshold
    #[serde(default = "default_volume_tiers")]
    pub volume_tiers: Vec<Tier>,
    /// Awarded when best of 1h/24h change (%) >= threshold
    #[serde(default = "default_momentum_tiers")]
    pub momentum_tiers: Vec<Tier>,
    /// Awarded when age (seconds) <= threshold
    #[serde(default = "default_age_tiers")]
    pub age_tiers: Vec<Tier>,
    /// Name/symbol regexes that reject a token before scoring
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

fn default_min_score() -> u32 {
    50
}

fn default_min_liquidity() -> f64 {
    500.0
}

fn default_min_volume() -> f64 {
    1000.0
}

fn default_max_age() -> u64 {
    3600
}

fn default_reentry_cooldown() -> u64 {
    300
}

fn default_liquidity_tiers() -> Vec<Tier> {
    vec![
        Tier::new(1_000.0, 10),
        Tier::new(5_000.0, 20),
        Tier::new(10_000.0, 25),
        Tier::new(50_000.0, 30),
    ]
}

fn default_volume_tiers() -> Vec<Tier> {
    vec![
        Tier::new(5_000.0, 10),
        Tier::new(10_000.0, 20),
        Tier::new(50_000.0, 25),
        Tier::new(100_000.0, 30),
    ]
}

fn default_momentum_tiers() -> Vec<Tier> {
    vec![
        Tier::new(1.0, 5),
        Tier::new(20.0, 15),
        Tier::new(50.0, 20),
        Tier::new(100.0, 25),
    ]
}

fn default_age_tiers() -> Vec<Tier> {
    vec![Tier::new(3600.0, 5), Tier::new(300.0, 10), Tier::new(60.0, 15)]
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            min_liquidity_usd: default_min_liquidity(),
            min_volume_usd: default_min_volume(),
            max_age_secs: default_max_age(),
            reentry_cooldown_secs: default_reentry_cooldown(),
            liquidity_tiers: default_liquidity_tiers(),
            volume_tiers: default_volume_tiers(),
            momentum_tiers: default_momentum_tiers(),
            age_tiers: default_age_tiers(),
            blocked_patterns: Vec::new(),
        }
    }
}

impl ScoringConfig {
    /// Check tier tables are usable
    pub fn validate(&self) -> anyhow::Result<()> {
        let tables = [
            ("liquidity_tiers", &self.liquidity_tiers),
            ("volume_tiers", &self.volume_tiers),
            ("momentum_tiers", &self.momentum_tiers),
            ("age_tiers", &self.age_tiers),
        ];
        for (name, tiers) in tables {
            if tiers.iter().any(|t| !t.threshold.is_finite()) {
                anyhow::bail!("{} contains a non-finite threshold", name);
            }
        }
        // Stricter tiers must not award fewer points
        let rising = [
            ("liquidity_tiers", &self.liquidity_tiers),
            ("volume_tiers", &self.volume_tiers),
            ("momentum_tiers", &self.momentum_tiers),
        ];
        for (name, tiers) in rising {
            if !is_monotone(tiers, false) {
                anyhow::bail!("{} must award more points for higher thresholds", name);
            }
        }
        if !is_monotone(&self.age_tiers, true) {
            anyhow::bail!("age_tiers must award more points for lower thresholds");
        }
        if self.min_liquidity_usd < 0.0 || self.min_volume_usd < 0.0 {
            anyhow::bail!("scoring minimums cannot be negative");
        }
        Ok(())
    }

    /// Highest score the tier tables can award
    pub fn max_score(&self) -> u32 {
        [
            &self.liquidity_tiers,
            &self.volume_tiers,
            &self.momentum_tiers,
            &self.age_tiers,
        ]
        .iter()
        .map(|tiers| tiers.iter().map(|t| t.points).max().unwrap_or(0))
        .sum()
    }
}

fn is_monotone(tiers: &[Tier], lower_is_better: bool) -> bool {
    let mut sorted = tiers.to_vec();
    sorted.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    if lower_is_better {
        sorted.reverse();
    }
    sorted.windows(2).all(|w| w[1].points >= w[0].points)
}

/// Book/ledger facts the scorer cannot see on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringContext {
    pub already_held: bool,
    pub recently_traded: bool,
}

/// Score and buy recommendation for one observation
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub total_score: u32,
    pub should_buy: bool,
    pub subscores: BTreeMap<Criterion, u32>,
    /// Every failed buy condition (empty when `should_buy`)
    pub rejections: Vec<Rejection>,
}

impl ScoreResult {
    /// Result for a token rejected before scoring
    pub fn blocked(pattern: &str) -> Self {
        Self {
            total_score: 0,
            should_buy: false,
            subscores: BTreeMap::new(),
            rejections: vec![Rejection::BlockedName {
                pattern: pattern.to_string(),
            }],
        }
    }

    pub fn subscore(&self, criterion: Criterion) -> u32 {
        self.subscores.get(&criterion).copied().unwrap_or(0)
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .subscores
            .iter()
            .map(|(c, p)| format!("{}={}", c, p))
            .collect();
        if self.should_buy {
            format!("score {} [{}] BUY", self.total_score, parts.join(" "))
        } else {
            let reasons: Vec<String> = self.rejections.iter().map(|r| r.to_string()).collect();
            format!(
                "score {} [{}] skip: {}",
                self.total_score,
                parts.join(" "),
                reasons.join(", ")
            )
        }
    }
}

/// Points for a value where higher is better
fn points_at_least(tiers: &[Tier], value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    tiers
        .iter()
        .filter(|t| value >= t.threshold)
        .map(|t| t.points)
        .max()
        .unwrap_or(0)
}

/// Points for a value where lower is better
fn points_at_most(tiers: &[Tier], value: f64) -> u32 {
    tiers
        .iter()
        .filter(|t| value <= t.threshold)
        .map(|t| t.points)
        .max()
        .unwrap_or(0)
}

/// Score an observation
///
/// Pure and deterministic. Missing or non-finite fields earn zero points
/// and fail any minimum they are checked against.
pub fn score(
    observation: &TokenObservation,
    config: &ScoringConfig,
    context: ScoringContext,
) -> ScoreResult {
    let liquidity = finite_or_zero(observation.liquidity_usd);
    let volume = finite_or_zero(observation.volume_24h_usd);

    let mut subscores = BTreeMap::new();
    subscores.insert(
        Criterion::Liquidity,
        points_at_least(&config.liquidity_tiers, liquidity),
    );
    subscores.insert(
        Criterion::Volume,
        points_at_least(&config.volume_tiers, volume),
    );
    subscores.insert(
        Criterion::Momentum,
        observation
            .best_price_change()
            .map(|change| points_at_least(&config.momentum_tiers, change))
            .unwrap_or(0),
    );
    subscores.insert(
        Criterion::Age,
        observation
            .age_seconds
            .map(|age| points_at_most(&config.age_tiers, age as f64))
            .unwrap_or(0),
    );

    let total_score: u32 = subscores.values().sum();

    let mut rejections = Vec::new();
    if !observation.has_valid_price() {
        rejections.push(Rejection::InvalidPrice {
            price: observation.price,
        });
    }
    if total_score < config.min_score {
        rejections.push(Rejection::BelowMinScore {
            score: total_score,
            min: config.min_score,
        });
    }
    if liquidity < config.min_liquidity_usd {
        rejections.push(Rejection::LowLiquidity {
            liquidity_usd: liquidity,
        });
    }
    if volume < config.min_volume_usd {
        rejections.push(Rejection::LowVolume { volume_usd: volume });
    }
    match observation.age_seconds {
        Some(age) if age <= config.max_age_secs => {}
        age_secs => rejections.push(Rejection::TooOld { age_secs }),
    }
    if context.already_held {
        rejections.push(Rejection::AlreadyHeld);
    }
    if context.recently_traded {
        rejections.push(Rejection::RecentlyTraded);
    }

    ScoreResult {
        total_score,
        should_buy: rejections.is_empty(),
        subscores,
        rejections,
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::observation;

    fn scenario_a() -> TokenObservation {
        TokenObservation {
            pair_id: "pair_a".into(),
            token_address: "mint_a".into(),
            symbol: "MEME".into(),
            name: "Meme".into(),
            price: 0.0001,
            liquidity_usd: 60_000.0,
            volume_24h_usd: 120_000.0,
            price_change_1h: None,
            price_change_24h: Some(150.0),
            age_seconds: Some(1),
        }
    }

    #[test]
    fn test_fresh_liquid_token_is_a_buy() {
        let result = score(&scenario_a(), &ScoringConfig::default(), ScoringContext::default());

        assert!(result.should_buy, "{}", result.summary());
        assert!(result.total_score >= 90);
        assert_eq!(result.subscore(Criterion::Liquidity), 30);
        assert_eq!(result.subscore(Criterion::Volume), 30);
        assert_eq!(result.subscore(Criterion::Momentum), 25);
        assert_eq!(result.subscore(Criterion::Age), 15);
        assert!(result.rejections.is_empty());
    }

    #[test]
    fn test_non_positive_price_never_buys() {
        let config = ScoringConfig::default();
        for price in [0.0, -0.5, f64::NAN] {
            let mut obs = scenario_a();
            obs.price = price;
            let result = score(&obs, &config, ScoringContext::default());
            assert!(!result.should_buy);
            assert!(matches!(
                result.rejections[0],
                Rejection::InvalidPrice { .. }
            ));
        }
    }

    #[test]
    fn test_missing_fields_score_zero() {
        let mut obs = scenario_a();
        obs.price_change_1h = None;
        obs.price_change_24h = None;
        obs.age_seconds = None;
        obs.liquidity_usd = f64::NAN;

        let result = score(&obs, &ScoringConfig::default(), ScoringContext::default());
        assert_eq!(result.subscore(Criterion::Momentum), 0);
        assert_eq!(result.subscore(Criterion::Age), 0);
        assert_eq!(result.subscore(Criterion::Liquidity), 0);
        assert!(!result.should_buy);
        assert!(result
            .rejections
            .contains(&Rejection::TooOld { age_secs: None }));
        assert!(result
            .rejections
            .contains(&Rejection::LowLiquidity { liquidity_usd: 0.0 }));
    }

    #[test]
    fn test_tiers_are_monotone() {
        let config = ScoringConfig::default();
        let mut last = 0;
        for liquidity in [0.0, 999.0, 1_000.0, 7_500.0, 20_000.0, 1e9] {
            let points = points_at_least(&config.liquidity_tiers, liquidity);
            assert!(points >= last);
            last = points;
        }

        let mut last = u32::MAX;
        for age in [0.0, 59.0, 61.0, 400.0, 3_600.0, 3_601.0] {
            let points = points_at_most(&config.age_tiers, age);
            assert!(points <= last);
            last = points;
        }
        assert_eq!(points_at_most(&config.age_tiers, 3_601.0), 0);
    }

    #[test]
    fn test_validate_rejects_inverted_tiers() {
        assert!(ScoringConfig::default().validate().is_ok());

        let mut config = ScoringConfig::default();
        config.volume_tiers = vec![Tier::new(1_000.0, 20), Tier::new(10_000.0, 5)];
        assert!(config.validate().is_err());

        let mut config = ScoringConfig::default();
        config.age_tiers = vec![Tier::new(60.0, 5), Tier::new(3_600.0, 15)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thresholds_gate_buy() {
        let config = ScoringConfig::default();

        let mut obs = scenario_a();
        obs.age_seconds = Some(config.max_age_secs + 1);
        let result = score(&obs, &config, ScoringContext::default());
        assert!(!result.should_buy);

        let mut obs = scenario_a();
        obs.volume_24h_usd = 10.0;
        let result = score(&obs, &config, ScoringContext::default());
        assert!(!result.should_buy);
        assert!(result
            .rejections
            .contains(&Rejection::LowVolume { volume_usd: 10.0 }));
    }

    #[test]
    fn test_held_or_recent_pair_is_skipped() {
        let config = ScoringConfig::default();
        let obs = scenario_a();

        let held = score(
            &obs,
            &config,
            ScoringContext {
                already_held: true,
                recently_traded: false,
            },
        );
        assert!(!held.should_buy);
        assert_eq!(held.rejections, vec![Rejection::AlreadyHeld]);

        let recent = score(
            &obs,
            &config,
            ScoringContext {
                already_held: false,
                recently_traded: true,
            },
        );
        assert_eq!(recent.rejections, vec![Rejection::RecentlyTraded]);
        // Score itself is unaffected
        assert_eq!(held.total_score, recent.total_score);
    }

    #[test]
    fn test_score_is_deterministic() {
        let config = ScoringConfig::default();
        let obs = observation("det", 0.01);
        let a = score(&obs, &config, ScoringContext::default());
        let b = score(&obs, &config, ScoringContext::default());
        assert_eq!(a.total_score, b.total_score);
        assert_eq!(a.subscores, b.subscores);
        assert_eq!(a.should_buy, b.should_buy);
    }

    #[test]
    fn test_max_score() {
        assert_eq!(ScoringConfig::default().max_score(), 100);
    }
}
