//! Token name filtering
//!
//! Rejects observations whose name or symbol matches a blocked pattern
//! before they reach the scorer.

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::feed::TokenObservation;

/// Filter result
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    /// Token passed all filters
    Pass,
    /// Token name or symbol matched this pattern
    Blocked(String),
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }
}

/// Regex blocklist over token names and symbols
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    blocked_patterns: Vec<Regex>,
}

impl TokenFilter {
    /// Compile the configured patterns
    pub fn new(patterns: &[String]) -> Result<Self> {
        let blocked_patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidRegex(e.to_string()))?;

        Ok(Self { blocked_patterns })
    }

    pub fn filter(&self, observation: &TokenObservation) -> FilterResult {
        for pattern in &self.blocked_patterns {
            if pattern.is_match(&observation.name) || pattern.is_match(&observation.symbol) {
                debug!(
                    "Token {} ({}) blocked by pattern: {}",
                    observation.name, observation.symbol, pattern
                );
                return FilterResult::Blocked(pattern.to_string());
            }
        }
        FilterResult::Pass
    }

    pub fn pattern_count(&self) -> usize {
        self.blocked_patterns.len()
    }
}
