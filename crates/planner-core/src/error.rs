//! Error Types for the Exit Planner

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for planner operations
pub type Result<T> = std::result::Result<T, PlannerError>;

#[derive(Error, Debug)]
pub enum PlannerError {
    /// Rejected at the edit boundary; nothing was mutated
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid quantity: {0} (must be greater than zero)")]
    InvalidQuantity(Decimal),

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Exit level not found: {0}")]
    LevelNotFound(String),

    #[error("Ledger event not found: {0}")]
    EventNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Exit level {0} is executed and frozen")]
    LevelFrozen(String),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    /// Price source failure (network, HTTP status, malformed payload)
    #[error("Price source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PlannerError {
    /// Errors that degrade to a fallback tier instead of failing the caller
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::PriceUnavailable(_) | Self::PositionNotFound(_)
        )
    }

    /// True when the error came from validating user-supplied values
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::InvalidQuantity(_) | Self::InvalidPrice(_)
        )
    }
}
