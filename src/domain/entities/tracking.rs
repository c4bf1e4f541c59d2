use chrono::{DateTime, Utc};
use serde::Serialize;

use super::UserId;

/// Per-user tracking settings; at most one row per user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingConfig {
    pub user_id: UserId,
    pub enabled: bool,
    pub stoploss_pct: f64,
    pub take_profit_pct: f64,
    pub volume_ma_days: u32,
    pub updated_at: DateTime<Utc>,
}

/// Per-symbol override of the default stoploss percentage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockStopLoss {
    pub user_id: UserId,
    pub symbol: String,
    pub stoploss_pct: f64,
}

/// Ratcheting stop for one (user, symbol).
///
/// `highest_price` never decreases while enabled and `trailing_stop_price` is
/// always `highest_price * (1 - trailing_pct)`. A `highest_price` of zero means
/// no price has been observed yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailingStopState {
    pub user_id: UserId,
    pub symbol: String,
    pub enabled: bool,
    pub trailing_pct: f64,
    pub highest_price: f64,
    pub trailing_stop_price: f64,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of feeding one price into a trailing stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingObservation {
    pub raised: bool,
    pub triggered: bool,
}

impl TrailingStopState {
    pub fn new(
        user_id: UserId,
        symbol: String,
        trailing_pct: f64,
        reference_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let highest_price = reference_price.filter(|p| *p > 0.0).unwrap_or(0.0);
        Self {
            user_id,
            symbol,
            enabled: true,
            trailing_pct,
            highest_price,
            trailing_stop_price: highest_price * (1.0 - trailing_pct),
            version: 0,
            updated_at: now,
        }
    }

    /// Ratchet the high-water mark and report whether the stop fired.
    pub fn observe(&mut self, price: f64, now: DateTime<Utc>) -> TrailingObservation {
        if !self.enabled {
            return TrailingObservation {
                raised: false,
                triggered: false,
            };
        }

        let raised = price > self.highest_price;
        if raised {
            self.highest_price = price;
            self.trailing_stop_price = self.highest_price * (1.0 - self.trailing_pct);
            self.updated_at = now;
        }

        TrailingObservation {
            raised,
            triggered: price <= self.trailing_stop_price,
        }
    }

    /// Change the trailing percentage of an armed stop. The high-water mark
    /// is kept and only moves up with `reference_price`.
    pub fn retune(&mut self, trailing_pct: f64, reference_price: Option<f64>, now: DateTime<Utc>) {
        if let Some(price) = reference_price.filter(|p| *p > self.highest_price) {
            self.highest_price = price;
        }
        self.enabled = true;
        self.trailing_pct = trailing_pct;
        self.trailing_stop_price = self.highest_price * (1.0 - trailing_pct);
        self.updated_at = now;
    }
}
