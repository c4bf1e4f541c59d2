use chrono::{DateTime, Utc};
use serde::Serialize;

use super::transaction::Side;
use super::UserId;

/// Quantities at or below this are treated as a closed position.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Aggregate holding of one symbol, maintained on every write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub user_id: UserId,
    pub symbol: String,
    pub quantity: f64,
    /// Running weighted-average cost, unchanged by sells.
    pub avg_cost: f64,
    pub updated_at: DateTime<Utc>,
}

/// What a single transaction does to the cached position row.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Upsert { quantity: f64, avg_cost: f64 },
    Delete,
    /// SELL with no open position: the log still records it.
    Untouched,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub change: PositionChange,
    /// Shares sold beyond what was held, clamped away.
    pub oversold: f64,
}

impl Position {
    /// Apply a BUY or SELL to the current `(quantity, avg_cost)` of a position.
    pub fn apply(current: Option<(f64, f64)>, side: Side, quantity: f64, price: f64) -> PositionUpdate {
        match (side, current) {
            (Side::Buy, Some((old_qty, old_avg))) => {
                let new_qty = old_qty + quantity;
                let new_avg = if new_qty > QUANTITY_EPSILON {
                    (old_qty * old_avg + quantity * price) / new_qty
                } else {
                    0.0
                };
                PositionUpdate {
                    change: PositionChange::Upsert {
                        quantity: new_qty,
                        avg_cost: new_avg,
                    },
                    oversold: 0.0,
                }
            }
            (Side::Buy, None) => PositionUpdate {
                change: PositionChange::Upsert {
                    quantity,
                    avg_cost: price,
                },
                oversold: 0.0,
            },
            (Side::Sell, Some((old_qty, old_avg))) => {
                let remaining = old_qty - quantity;
                let oversold = if remaining < 0.0 { -remaining } else { 0.0 };
                if remaining <= QUANTITY_EPSILON {
                    PositionUpdate {
                        change: PositionChange::Delete,
                        oversold,
                    }
                } else {
                    PositionUpdate {
                        change: PositionChange::Upsert {
                            quantity: remaining,
                            avg_cost: old_avg,
                        },
                        oversold,
                    }
                }
            }
            (Side::Sell, None) => PositionUpdate {
                change: PositionChange::Untouched,
                oversold: quantity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_buy_opens_position() {
        let update = Position::apply(None, Side::Buy, 100.0, 50_000.0);
        assert_eq!(
            update.change,
            PositionChange::Upsert {
                quantity: 100.0,
                avg_cost: 50_000.0
            }
        );
    }

    #[test]
    fn test_buy_updates_weighted_average() {
        let update = Position::apply(Some((100.0, 50_000.0)), Side::Buy, 50.0, 55_000.0);
        match update.change {
            PositionChange::Upsert { quantity, avg_cost } => {
                assert_eq!(quantity, 150.0);
                assert!((avg_cost - 51_666.666_666).abs() < 0.01);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_sell_keeps_average() {
        let update = Position::apply(Some((150.0, 51_666.67)), Side::Sell, 120.0, 60_000.0);
        assert_eq!(
            update.change,
            PositionChange::Upsert {
                quantity: 30.0,
                avg_cost: 51_666.67
            }
        );
        assert_eq!(update.oversold, 0.0);
    }

    #[test]
    fn test_oversell_clamps_and_deletes() {
        let update = Position::apply(Some((10.0, 100.0)), Side::Sell, 15.0, 90.0);
        assert_eq!(update.change, PositionChange::Delete);
        assert_eq!(update.oversold, 5.0);
    }

    #[test]
    fn test_sell_without_position_is_logged_only() {
        let update = Position::apply(None, Side::Sell, 5.0, 90.0);
        assert_eq!(update.change, PositionChange::Untouched);
        assert_eq!(update.oversold, 5.0);
    }
}
