//! Market Data Gateway
//!
//! The tracker never talks to a quote provider directly. Everything it needs
//! (last price, intraday volume and the volume baseline) comes through the
//! `MarketDataGateway` trait, so provider selection and fallback stay outside
//! the core and tests can substitute a scripted gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::MarketDataError;

pub type MarketDataResult<T> = Result<T, MarketDataError>;

/// Price plus whatever volume information the provider could supply.
///
/// Any of the volume fields may be missing; callers branch on their presence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub price: f64,
    /// Cumulative traded volume for the current session.
    #[serde(default)]
    pub volume: Option<f64>,
    /// Moving average of full-session volume over the requested window.
    #[serde(default)]
    pub volume_ma: Option<f64>,
    /// Standard deviation of full-session volume over the same window.
    #[serde(default)]
    pub volume_std: Option<f64>,
}

impl MarketSnapshot {
    pub fn price_only(price: f64) -> Self {
        Self {
            price,
            volume: None,
            volume_ma: None,
            volume_std: None,
        }
    }
}

#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Name of the provider, used in logs.
    fn name(&self) -> &str;

    /// Latest traded price.
    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64>;

    /// Latest price with session volume and a `volume_window_days` baseline.
    async fn get_price_and_volume(
        &self,
        symbol: &str,
        volume_window_days: u32,
    ) -> MarketDataResult<MarketSnapshot>;
}
