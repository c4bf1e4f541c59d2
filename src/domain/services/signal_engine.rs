//! Per-symbol exit evaluation.
//!
//! Rules run in a fixed order so that two rules firing on the same price
//! always resolve the same way. A fired trailing stop silences the fixed
//! stoploss; take-profit and the volume check are reported regardless.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::domain::entities::tracking::TrailingStopState;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::repositories::MarketSnapshot;
use crate::domain::value_objects::pnl::PnL;

use super::signals::{Signal, VolumeConfirmation};
use super::volume_profile::{assess_volume, expected_volume, VolumeThresholds};

/// Everything the engine needs to know about one held position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionContext<'a> {
    pub symbol: &'a str,
    pub quantity: f64,
    /// Cost basis used for thresholds and P&L.
    pub avg_cost: f64,
    pub stoploss_pct: f64,
    pub take_profit_pct: f64,
}

/// Result of evaluating one symbol for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    /// `None` when market data was unavailable this tick.
    pub price: Option<f64>,
    pub pnl: Option<f64>,
    pub signals: Vec<Signal>,
}

impl SymbolReport {
    pub fn unavailable(ctx: &PositionContext<'_>) -> Self {
        Self {
            symbol: ctx.symbol.to_string(),
            quantity: ctx.quantity,
            avg_cost: ctx.avg_cost,
            price: None,
            pnl: None,
            signals: Vec::new(),
        }
    }
}

/// What happened to the trailing state while evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrailingEffect {
    /// The high-water mark moved and must be persisted.
    pub raised: bool,
    pub triggered: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalEngine {
    thresholds: VolumeThresholds,
}

impl SignalEngine {
    pub fn new(thresholds: VolumeThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate one position against a market snapshot.
    ///
    /// `trailing` is mutated in place when the price sets a new high; the
    /// caller persists it when the returned effect says so.
    pub fn evaluate(
        &self,
        ctx: &PositionContext<'_>,
        snapshot: &MarketSnapshot,
        trailing: Option<&mut TrailingStopState>,
        local_time: NaiveTime,
        now: DateTime<Utc>,
    ) -> (SymbolReport, TrailingEffect) {
        let price = snapshot.price;
        let mut signals = Vec::new();
        let mut effect = TrailingEffect::default();

        if let Some(state) = trailing.filter(|s| s.enabled) {
            let observation = state.observe(price, now);
            effect = TrailingEffect {
                raised: observation.raised,
                triggered: observation.triggered,
            };
            if observation.triggered {
                signals.push(Signal::TrailingStop {
                    symbol: ctx.symbol.to_string(),
                    price,
                    highest_price: state.highest_price,
                    stop_price: state.trailing_stop_price,
                });
            }
        }

        let has_cost = ctx.avg_cost > 0.0;

        if !effect.triggered && has_cost {
            let threshold = ctx.avg_cost * (1.0 - ctx.stoploss_pct);
            if price <= threshold {
                signals.push(Signal::StopLoss {
                    symbol: ctx.symbol.to_string(),
                    price,
                    threshold,
                    stoploss_pct: ctx.stoploss_pct,
                });
            }
        }

        if has_cost {
            let target = ctx.avg_cost * (1.0 + ctx.take_profit_pct);
            if price >= target {
                // Session volume so far is judged against what a typical day
                // has traded by this time, not the full-day average.
                let confirmation = match (snapshot.volume, snapshot.volume_ma) {
                    (Some(volume), Some(ma)) => match expected_volume(ma, local_time) {
                        Some(expected) if volume > expected => VolumeConfirmation::Confirmed,
                        Some(_) => VolumeConfirmation::Pending,
                        None => VolumeConfirmation::Unavailable,
                    },
                    _ => VolumeConfirmation::Unavailable,
                };
                signals.push(Signal::TakeProfit {
                    symbol: ctx.symbol.to_string(),
                    price,
                    target,
                    confirmation,
                });
            }
        }

        if let Some(signal) = self.volume_signal(ctx.symbol, snapshot, local_time) {
            signals.push(signal);
        }

        let pnl = PnL::unrealized(price, ctx.avg_cost, ctx.quantity)
            .ok()
            .map(|p| p.value());

        let report = SymbolReport {
            symbol: ctx.symbol.to_string(),
            quantity: ctx.quantity,
            avg_cost: ctx.avg_cost,
            price: Some(price),
            pnl,
            signals,
        };
        (report, effect)
    }

    fn volume_signal(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
        local_time: NaiveTime,
    ) -> Option<Signal> {
        let volume = snapshot.volume?;
        let average = snapshot.volume_ma?;
        let assessment = assess_volume(
            volume,
            average,
            snapshot.volume_std,
            local_time,
            self.thresholds,
        )?;
        let kind = assessment.anomaly?;
        Some(Signal::VolumeAnomaly {
            symbol: symbol.to_string(),
            kind,
            z_score: assessment.z_score,
            volume,
            expected: assessment.expected,
        })
    }

    pub fn evaluate_watchlist(&self, entry: &WatchlistEntry, price: f64) -> Option<Signal> {
        if !entry.is_buy_opportunity(price) {
            return None;
        }
        Some(Signal::BuyOpportunity {
            symbol: entry.symbol.clone(),
            price,
            target_price: entry.target_price?,
        })
    }
}
