//! Error types for the trading engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    // Position lifecycle errors
    #[error("Invalid price {price} for pair {pair_id}")]
    InvalidPrice { pair_id: String, price: f64 },

    #[error("Insufficient capital: ${available:.4} available, ${required:.4} required")]
    InsufficientCapital { available: f64, required: f64 },

    #[error("Pair already held: {0}")]
    AlreadyHeld(String),

    #[error("Position limit reached: {max} open positions")]
    PositionLimitReached { max: usize },

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    // Collaborator errors
    #[error("Token feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Price unavailable for {pair_id}: {reason}")]
    PriceUnavailable { pair_id: String, reason: String },

    #[error("Collaborator timed out after {0}ms")]
    Timeout(u64),

    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is transient (the next tick tries again)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FeedUnavailable(_)
                | Error::PriceUnavailable { .. }
                | Error::Timeout(_)
                | Error::PersistenceFailure(_)
        )
    }

    /// Check if this error is an open refused by a trading rule
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidPrice { .. }
                | Error::InsufficientCapital { .. }
                | Error::AlreadyHeld(_)
                | Error::PositionLimitReached { .. }
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::FeedUnavailable(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
