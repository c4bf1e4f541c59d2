pub mod position;
pub mod tracking;
pub mod transaction;
pub mod watchlist;

/// Chat-platform user identifier.
pub type UserId = i64;
