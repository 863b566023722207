//! Memecoin Trader Library
//!
//! Simulated memecoin trading loop: discover tokens, score them, open
//! virtual positions and close them by exit rules against an in-memory
//! ledger persisted to a JSON snapshot.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod filter;
pub mod ledger;
pub mod persistence;
pub mod position;
pub mod report;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use engine::{SharedEngine, TradingEngine};
pub use error::{Error, Result};
