use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;
use crate::domain::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(ValidationError::InvalidSide(other.to_string())),
        }
    }
}

/// One entry of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub executed_at: DateTime<Utc>,
}

/// A quantity of shares still held at a specific unit cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Lot {
    pub quantity: f64,
    pub unit_cost: f64,
}

impl Lot {
    pub fn new(quantity: f64, unit_cost: f64) -> Self {
        Self {
            quantity,
            unit_cost,
        }
    }

    pub fn cost(&self) -> f64 {
        self.quantity * self.unit_cost
    }
}
