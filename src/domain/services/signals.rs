//! Exit and advisory signals produced by a tick.

use serde::Serialize;

/// How loudly the dispatcher should present a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What the user is advised to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Sell,
    TakeProfit,
    Watch,
    ConsiderBuying,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Sell => write!(f, "SELL"),
            Action::TakeProfit => write!(f, "TAKE PROFIT"),
            Action::Watch => write!(f, "WATCH"),
            Action::ConsiderBuying => write!(f, "CONSIDER BUYING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeConfirmation {
    /// Session volume above the time-of-day share of its moving average.
    Confirmed,
    /// No volume data; the target alone is enough.
    Unavailable,
    /// Target hit but volume has not confirmed the move yet.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnomalyKind {
    Spike,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    TrailingStop {
        symbol: String,
        price: f64,
        highest_price: f64,
        stop_price: f64,
    },
    StopLoss {
        symbol: String,
        price: f64,
        threshold: f64,
        stoploss_pct: f64,
    },
    TakeProfit {
        symbol: String,
        price: f64,
        target: f64,
        confirmation: VolumeConfirmation,
    },
    VolumeAnomaly {
        symbol: String,
        kind: AnomalyKind,
        z_score: f64,
        volume: f64,
        expected: f64,
    },
    BuyOpportunity {
        symbol: String,
        price: f64,
        target_price: f64,
    },
}

impl Signal {
    pub fn symbol(&self) -> &str {
        match self {
            Signal::TrailingStop { symbol, .. }
            | Signal::StopLoss { symbol, .. }
            | Signal::TakeProfit { symbol, .. }
            | Signal::VolumeAnomaly { symbol, .. }
            | Signal::BuyOpportunity { symbol, .. } => symbol,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Signal::TrailingStop { .. } | Signal::StopLoss { .. } => Severity::Critical,
            Signal::TakeProfit {
                confirmation: VolumeConfirmation::Pending,
                ..
            } => Severity::Info,
            Signal::TakeProfit { .. } => Severity::Warning,
            Signal::VolumeAnomaly { .. } | Signal::BuyOpportunity { .. } => Severity::Info,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Signal::TrailingStop { .. } | Signal::StopLoss { .. } => Action::Sell,
            Signal::TakeProfit {
                confirmation: VolumeConfirmation::Pending,
                ..
            } => Action::Watch,
            Signal::TakeProfit { .. } => Action::TakeProfit,
            Signal::VolumeAnomaly { .. } => Action::Watch,
            Signal::BuyOpportunity { .. } => Action::ConsiderBuying,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Signal::TrailingStop {
                price,
                highest_price,
                stop_price,
                ..
            } => format!(
                "trailing stop hit: price {:.2} <= stop {:.2} (high {:.2})",
                price, stop_price, highest_price
            ),
            Signal::StopLoss {
                price,
                threshold,
                stoploss_pct,
                ..
            } => format!(
                "stoploss hit: price {:.2} <= {:.2} (-{:.1}% from cost)",
                price,
                threshold,
                stoploss_pct * 100.0
            ),
            Signal::TakeProfit {
                price,
                target,
                confirmation,
                ..
            } => match confirmation {
                VolumeConfirmation::Confirmed => format!(
                    "breakout: price {:.2} >= target {:.2} with volume above average",
                    price, target
                ),
                VolumeConfirmation::Unavailable => format!(
                    "take-profit target reached: price {:.2} >= {:.2}",
                    price, target
                ),
                VolumeConfirmation::Pending => format!(
                    "target reached ({:.2} >= {:.2}), awaiting volume confirmation",
                    price, target
                ),
            },
            Signal::VolumeAnomaly {
                kind,
                z_score,
                volume,
                expected,
                ..
            } => {
                let label = match kind {
                    AnomalyKind::Spike => "volume spike",
                    AnomalyKind::Drop => "volume drought",
                };
                format!(
                    "{}: {:.0} vs expected {:.0} (z={:.2})",
                    label, volume, expected, z_score
                )
            }
            Signal::BuyOpportunity {
                price,
                target_price,
                ..
            } => format!(
                "watchlist target reached: price {:.2} <= {:.2}",
                price, target_price
            ),
        }
    }
}
