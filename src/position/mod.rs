//! Position management module

pub mod exit;
pub mod manager;

pub use exit::{ExitConfig, ExitDecision, ExitEvaluator, ExitReason};
pub use manager::{Position, PositionBook};
