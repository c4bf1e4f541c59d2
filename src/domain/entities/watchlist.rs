use chrono::{DateTime, Utc};
use serde::Serialize;

use super::UserId;

/// A symbol the user follows without holding it yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistEntry {
    pub user_id: UserId,
    pub symbol: String,
    pub target_price: Option<f64>,
    pub notes: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    /// A buy opportunity exists once the price trades at or below the target.
    pub fn is_buy_opportunity(&self, price: f64) -> bool {
        matches!(self.target_price, Some(target) if price <= target)
    }
}
