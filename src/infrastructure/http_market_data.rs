//! Quote service client.
//!
//! Talks to a JSON quote service exposing
//! `GET {base}/quote/{symbol}?volume_window={days}` which answers
//! `{"price": .., "volume": .., "volume_ma": .., "volume_std": ..}` with the
//! volume fields optional.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::MarketDataError;
use crate::domain::repositories::{MarketDataGateway, MarketDataResult, MarketSnapshot};

/// Volume window requested when only the price is needed.
const PRICE_ONLY_WINDOW: u32 = 1;

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    volume_ma: Option<f64>,
    #[serde(default)]
    volume_std: Option<f64>,
}

impl QuoteResponse {
    fn into_snapshot(self, symbol: &str) -> MarketDataResult<MarketSnapshot> {
        let price = self
            .price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| MarketDataError::Unavailable {
                symbol: symbol.to_string(),
            })?;
        let positive = |v: Option<f64>| v.filter(|v| v.is_finite() && *v >= 0.0);
        Ok(MarketSnapshot {
            price,
            volume: positive(self.volume),
            volume_ma: positive(self.volume_ma),
            volume_std: positive(self.volume_std),
        })
    }
}

pub struct HttpMarketDataGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpMarketDataGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stock-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MarketDataError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn quote_url(&self, symbol: &str, volume_window_days: u32) -> String {
        format!(
            "{}/quote/{}?volume_window={}",
            self.base_url, symbol, volume_window_days
        )
    }

    async fn fetch(&self, symbol: &str, volume_window_days: u32) -> MarketDataResult<MarketSnapshot> {
        let url = self.quote_url(symbol, volume_window_days);
        debug!(url = %url, "Requesting quote");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                MarketDataError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                MarketDataError::Provider(format!("Failed to request quote: {}", e))
            }
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(MarketDataError::Unavailable {
                    symbol: symbol.to_string(),
                })
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                return Err(MarketDataError::Provider(format!(
                    "Quote API error: {} - {}",
                    status, error_text
                )));
            }
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| MarketDataError::Provider(format!("Failed to parse quote: {}", e)))?;
        quote.into_snapshot(symbol)
    }
}

#[async_trait]
impl MarketDataGateway for HttpMarketDataGateway {
    fn name(&self) -> &str {
        "http-quote"
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        self.fetch(symbol, PRICE_ONLY_WINDOW)
            .await
            .map(|snapshot| snapshot.price)
    }

    async fn get_price_and_volume(
        &self,
        symbol: &str,
        volume_window_days: u32,
    ) -> MarketDataResult<MarketSnapshot> {
        self.fetch(symbol, volume_window_days.max(1)).await
    }
}
