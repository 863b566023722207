//! Token filtering and scoring
//!
//! Observations first pass the name blocklist, then the bucketed scorer.

pub mod scoring;
pub mod token_filter;

pub use scoring::{score, Criterion, Rejection, ScoreResult, ScoringConfig, ScoringContext, Tier};
pub use token_filter::{FilterResult, TokenFilter};

use tracing::debug;

use crate::error::Result;
use crate::feed::TokenObservation;

/// Blocklist plus scorer, built once from config
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    filter: TokenFilter,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        let filter = TokenFilter::new(&config.blocked_patterns)?;
        debug!(
            "Scorer ready: min score {}/{}, {} blocked patterns",
            config.min_score,
            config.max_score(),
            filter.pattern_count()
        );
        Ok(Self { config, filter })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Filter then score one observation
    pub fn evaluate(&self, observation: &TokenObservation, context: ScoringContext) -> ScoreResult {
        match self.filter.filter(observation) {
            FilterResult::Blocked(pattern) => ScoreResult::blocked(&pattern),
            FilterResult::Pass => score(observation, &self.config, context),
        }
    }
}
