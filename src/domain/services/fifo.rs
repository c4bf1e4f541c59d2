//! FIFO lot replay over a symbol's transaction log.

use std::collections::VecDeque;

use crate::domain::entities::position::QUANTITY_EPSILON;
use crate::domain::entities::transaction::{Lot, Side, Transaction};

/// Replay `transactions` (already in timestamp order) into the lots still held.
///
/// BUY pushes a lot; SELL consumes from the oldest lot first, splitting it when
/// the sale is smaller. Selling more than is held drains every lot and the
/// excess is ignored.
pub fn compute_fifo_lots(transactions: &[Transaction]) -> Vec<Lot> {
    let mut lots: VecDeque<Lot> = VecDeque::new();

    for tx in transactions {
        match tx.side {
            Side::Buy => lots.push_back(Lot::new(tx.quantity, tx.price)),
            Side::Sell => {
                let mut remaining = tx.quantity;
                while remaining > QUANTITY_EPSILON {
                    let Some(front) = lots.front_mut() else {
                        break;
                    };
                    if front.quantity > remaining {
                        front.quantity -= remaining;
                        remaining = 0.0;
                    } else {
                        remaining -= front.quantity;
                        lots.pop_front();
                    }
                }
            }
        }
    }

    lots.into_iter().collect()
}

/// Value-weighted average unit cost of `lots`, `None` when nothing is held.
pub fn weighted_average_cost(lots: &[Lot]) -> Option<f64> {
    let total_qty: f64 = lots.iter().map(|l| l.quantity).sum();
    if total_qty <= QUANTITY_EPSILON {
        return None;
    }
    let total_cost: f64 = lots.iter().map(Lot::cost).sum();
    Some(total_cost / total_qty)
}
