//! Database Models
//!
//! Row shapes for the tracker tables and their conversion into domain entities.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::DatabaseError;
use crate::domain::entities::position::Position;
use crate::domain::entities::tracking::{StockStopLoss, TrackingConfig, TrailingStopState};
use crate::domain::entities::transaction::{Side, Transaction};
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::entities::UserId;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub user_id: i64,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub side: String, // "BUY" or "SELL"
    pub quantity: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = DatabaseError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let side: Side = record
            .side
            .parse()
            .map_err(|e| DatabaseError::CorruptRow(format!("transaction {}: {}", record.id, e)))?;
        Ok(Transaction {
            id: record.id,
            user_id: record.user_id,
            symbol: record.symbol,
            side,
            quantity: record.quantity,
            price: record.price,
            executed_at: record.ts,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PositionRecord {
    pub user_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<PositionRecord> for Position {
    fn from(record: PositionRecord) -> Self {
        Position {
            user_id: record.user_id,
            symbol: record.symbol,
            quantity: record.quantity,
            avg_cost: record.avg_cost,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TrackingConfigRecord {
    pub user_id: i64,
    pub enabled: bool,
    pub stoploss_pct: f64,
    pub take_profit_pct: f64,
    pub volume_ma_days: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<TrackingConfigRecord> for TrackingConfig {
    fn from(record: TrackingConfigRecord) -> Self {
        TrackingConfig {
            user_id: record.user_id,
            enabled: record.enabled,
            stoploss_pct: record.stoploss_pct,
            take_profit_pct: record.take_profit_pct,
            volume_ma_days: u32::try_from(record.volume_ma_days.max(1)).unwrap_or(u32::MAX),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StockStopLossRecord {
    pub user_id: i64,
    pub symbol: String,
    pub stoploss_pct: f64,
}

impl From<StockStopLossRecord> for StockStopLoss {
    fn from(record: StockStopLossRecord) -> Self {
        StockStopLoss {
            user_id: record.user_id,
            symbol: record.symbol,
            stoploss_pct: record.stoploss_pct,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TrailingStopRecord {
    pub user_id: i64,
    pub symbol: String,
    pub enabled: bool,
    pub trailing_pct: f64,
    pub highest_price: f64,
    pub trailing_stop_price: f64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<TrailingStopRecord> for TrailingStopState {
    fn from(record: TrailingStopRecord) -> Self {
        TrailingStopState {
            user_id: record.user_id,
            symbol: record.symbol,
            enabled: record.enabled,
            trailing_pct: record.trailing_pct,
            highest_price: record.highest_price,
            trailing_stop_price: record.trailing_stop_price,
            version: record.version,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WatchlistRecord {
    pub user_id: i64,
    pub symbol: String,
    pub target_price: Option<f64>,
    pub notes: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl From<WatchlistRecord> for WatchlistEntry {
    fn from(record: WatchlistRecord) -> Self {
        WatchlistEntry {
            user_id: record.user_id,
            symbol: record.symbol,
            target_price: record.target_price,
            notes: record.notes,
            added_at: record.added_at,
        }
    }
}

/// Input for appending to the ledger.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub requested_at: DateTime<Utc>,
}
