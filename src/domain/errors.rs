use thiserror::Error;

use crate::persistence::DatabaseError;

/// Errors raised when constructing value objects from raw input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid percentage: {0}")]
    InvalidPercentage(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid notification channel: {0}")]
    InvalidChannel(String),

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

/// Errors surfaced by the tracker's public operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("No reset request is pending")]
    ResetNotPending,

    #[error("Reset request expired after {ttl_secs}s")]
    ResetExpired { ttl_secs: u64 },
}

/// Market data lookup failures. Every variant degrades to "no data" for the
/// affected symbol on the current tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("No data available for {symbol}")]
    Unavailable { symbol: String },

    #[error("Market data request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Market data provider error: {0}")]
    Provider(String),
}

/// Notification sink failures. Logged by the dispatcher, never retried in-tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("Notification channel unreachable: {0}")]
    Unreachable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("Notification timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

pub type TrackerResult<T> = Result<T, TrackerError>;
