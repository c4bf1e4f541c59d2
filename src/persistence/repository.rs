//! Database Repository
//!
//! Data access for the ledger, tracking settings, watchlists and users.

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::position::{Position, PositionChange, PositionUpdate};
use crate::domain::entities::tracking::{StockStopLoss, TrackingConfig, TrailingStopState};
use crate::domain::entities::transaction::Transaction;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::entities::UserId;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// A ledger write as it was committed.
#[derive(Debug, Clone)]
pub struct RecordedTransaction {
    pub transaction: Transaction,
    pub update: PositionUpdate,
    /// The requested timestamp was earlier than the symbol's last entry.
    pub clamped: bool,
}

/// Transaction log and the position rows derived from it.
#[derive(Clone)]
pub struct LedgerRepository {
    pool: DbPool,
}

impl LedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a transaction and update the position row atomically.
    ///
    /// The stored timestamp never precedes the last one recorded for the same
    /// symbol, so `(ts, id)` order is insertion order.
    pub async fn record(&self, new: NewTransaction) -> Result<RecordedTransaction, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin ledger transaction: {}", e);
            DatabaseError::QueryError(format!("Failed to begin transaction: {}", e))
        })?;

        let last_ts: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT ts FROM transactions WHERE user_id = ?1 AND symbol = ?2 ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .bind(new.user_id)
        .bind(&new.symbol)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to read last timestamp for {}: {}", new.symbol, e);
            DatabaseError::QueryError(format!("Failed to read last timestamp: {}", e))
        })?;

        let (ts, clamped) = match last_ts {
            Some(last) if new.requested_at < last => (last, true),
            _ => (new.requested_at, false),
        };

        let current = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND symbol = ?2",
        )
        .bind(new.user_id)
        .bind(&new.symbol)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to read position {}: {}", new.symbol, e);
            DatabaseError::QueryError(format!("Failed to read position: {}", e))
        })?;

        let update = Position::apply(
            current.map(|p| (p.quantity, p.avg_cost)),
            new.side,
            new.quantity,
            new.price,
        );

        let record = sqlx::query_as::<_, TransactionRecord>(
            r#"
            INSERT INTO transactions (user_id, symbol, side, quantity, price, ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(&new.symbol)
        .bind(new.side.as_str())
        .bind(new.quantity)
        .bind(new.price)
        .bind(ts)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert transaction for {}: {}", new.symbol, e);
            DatabaseError::QueryError(format!("Failed to insert transaction: {}", e))
        })?;

        match &update.change {
            PositionChange::Upsert { quantity, avg_cost } => {
                sqlx::query(
                    r#"
                    INSERT INTO positions (user_id, symbol, quantity, avg_cost, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(user_id, symbol) DO UPDATE SET
                        quantity = excluded.quantity,
                        avg_cost = excluded.avg_cost,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(new.user_id)
                .bind(&new.symbol)
                .bind(*quantity)
                .bind(*avg_cost)
                .bind(ts)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to upsert position {}: {}", new.symbol, e);
                    DatabaseError::QueryError(format!("Failed to upsert position: {}", e))
                })?;
            }
            PositionChange::Delete => {
                sqlx::query("DELETE FROM positions WHERE user_id = ?1 AND symbol = ?2")
                    .bind(new.user_id)
                    .bind(&new.symbol)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        error!("Failed to delete position {}: {}", new.symbol, e);
                        DatabaseError::QueryError(format!("Failed to delete position: {}", e))
                    })?;
            }
            PositionChange::Untouched => {}
        }

        tx.commit().await.map_err(|e| {
            error!("Failed to commit ledger transaction: {}", e);
            DatabaseError::QueryError(format!("Failed to commit transaction: {}", e))
        })?;

        debug!(
            "Recorded {} {} {} @ {} for user {}",
            record.side, record.quantity, record.symbol, record.price, record.user_id
        );

        Ok(RecordedTransaction {
            transaction: Transaction::try_from(record)?,
            update,
            clamped,
        })
    }

    /// Transactions for one symbol in replay order.
    pub async fn transactions(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let records = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE user_id = ?1 AND symbol = ?2 ORDER BY ts ASC, id ASC",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get transactions for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get transactions: {}", e))
        })?;

        records.into_iter().map(Transaction::try_from).collect()
    }

    pub async fn position(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND symbol = ?2",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get position {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get position: {}", e))
        })?;

        Ok(record.map(Position::from))
    }

    /// Open positions of a user, ordered by symbol.
    pub async fn positions(&self, user_id: UserId) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ?1 AND quantity > 0 ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get positions for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get positions: {}", e))
        })?;

        Ok(records.into_iter().map(Position::from).collect())
    }

    /// Remove everything a user owns except the channel registration.
    pub async fn delete_user_data(&self, user_id: UserId) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            DatabaseError::QueryError(format!("Failed to begin transaction: {}", e))
        })?;

        for table in [
            "transactions",
            "positions",
            "tracking_config",
            "stock_stoploss",
            "trailing_stop",
            "watchlist",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = ?1", table))
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to clear {} for user {}: {}", table, user_id, e);
                    DatabaseError::QueryError(format!("Failed to clear {}: {}", table, e))
                })?;
        }

        tx.commit().await.map_err(|e| {
            DatabaseError::QueryError(format!("Failed to commit transaction: {}", e))
        })?;

        debug!("Cleared all data for user {}", user_id);
        Ok(())
    }
}

/// Tracking settings, per-symbol stoplosses and trailing-stop state.
#[derive(Clone)]
pub struct TrackingRepository {
    pool: DbPool,
}

impl TrackingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn config(&self, user_id: UserId) -> Result<Option<TrackingConfig>, DatabaseError> {
        let record = sqlx::query_as::<_, TrackingConfigRecord>(
            "SELECT * FROM tracking_config WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get tracking config for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get tracking config: {}", e))
        })?;

        Ok(record.map(TrackingConfig::from))
    }

    pub async fn upsert_config(&self, config: &TrackingConfig) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO tracking_config
                (user_id, enabled, stoploss_pct, take_profit_pct, volume_ma_days, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                enabled = excluded.enabled,
                stoploss_pct = excluded.stoploss_pct,
                take_profit_pct = excluded.take_profit_pct,
                volume_ma_days = excluded.volume_ma_days,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config.user_id)
        .bind(config.enabled)
        .bind(config.stoploss_pct)
        .bind(config.take_profit_pct)
        .bind(i64::from(config.volume_ma_days))
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save tracking config for user {}: {}", config.user_id, e);
            DatabaseError::QueryError(format!("Failed to save tracking config: {}", e))
        })?;

        debug!(
            "Saved tracking config for user {} (enabled={})",
            config.user_id, config.enabled
        );
        Ok(())
    }

    pub async fn enabled_users(&self) -> Result<Vec<UserId>, DatabaseError> {
        sqlx::query_scalar(
            "SELECT user_id FROM tracking_config WHERE enabled = 1 ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list enabled users: {}", e);
            DatabaseError::QueryError(format!("Failed to list enabled users: {}", e))
        })
    }

    pub async fn set_symbol_stoploss(
        &self,
        user_id: UserId,
        symbol: &str,
        stoploss_pct: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO stock_stoploss (user_id, symbol, stoploss_pct, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, symbol) DO UPDATE SET
                stoploss_pct = excluded.stoploss_pct,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(stoploss_pct)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save stoploss for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to save stoploss: {}", e))
        })?;

        Ok(())
    }

    pub async fn symbol_stoplosses(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StockStopLoss>, DatabaseError> {
        let records = sqlx::query_as::<_, StockStopLossRecord>(
            "SELECT user_id, symbol, stoploss_pct FROM stock_stoploss WHERE user_id = ?1 ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get stoplosses for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get stoplosses: {}", e))
        })?;

        Ok(records.into_iter().map(StockStopLoss::from).collect())
    }

    pub async fn trailing_stop(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> Result<Option<TrailingStopState>, DatabaseError> {
        let record = sqlx::query_as::<_, TrailingStopRecord>(
            "SELECT * FROM trailing_stop WHERE user_id = ?1 AND symbol = ?2",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get trailing stop for {}: {}", symbol, e);
            DatabaseError::QueryError(format!("Failed to get trailing stop: {}", e))
        })?;

        Ok(record.map(TrailingStopState::from))
    }

    pub async fn trailing_stops(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TrailingStopState>, DatabaseError> {
        let records = sqlx::query_as::<_, TrailingStopRecord>(
            "SELECT * FROM trailing_stop WHERE user_id = ?1 ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get trailing stops for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get trailing stops: {}", e))
        })?;

        Ok(records.into_iter().map(TrailingStopState::from).collect())
    }

    /// Replace the trailing state for a symbol, bumping its version.
    ///
    /// Used when the user (re)configures or disables the stop; the new
    /// high-water mark is taken as given.
    pub async fn replace_trailing_stop(
        &self,
        state: &TrailingStopState,
    ) -> Result<TrailingStopState, DatabaseError> {
        let record = sqlx::query_as::<_, TrailingStopRecord>(
            r#"
            INSERT INTO trailing_stop
                (user_id, symbol, enabled, trailing_pct, highest_price,
                 trailing_stop_price, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
            ON CONFLICT(user_id, symbol) DO UPDATE SET
                enabled = excluded.enabled,
                trailing_pct = excluded.trailing_pct,
                highest_price = excluded.highest_price,
                trailing_stop_price = excluded.trailing_stop_price,
                version = trailing_stop.version + 1,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(state.user_id)
        .bind(&state.symbol)
        .bind(state.enabled)
        .bind(state.trailing_pct)
        .bind(state.highest_price)
        .bind(state.trailing_stop_price)
        .bind(state.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save trailing stop for {}: {}", state.symbol, e);
            DatabaseError::QueryError(format!("Failed to save trailing stop: {}", e))
        })?;

        Ok(TrailingStopState::from(record))
    }

    /// Persist a ratcheted state only if nobody wrote since it was read.
    ///
    /// Returns `false` when `state.version` is stale.
    pub async fn compare_and_set_trailing_stop(
        &self,
        state: &TrailingStopState,
    ) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE trailing_stop
            SET highest_price = ?1, trailing_stop_price = ?2,
                version = version + 1, updated_at = ?3
            WHERE user_id = ?4 AND symbol = ?5 AND version = ?6
            "#,
        )
        .bind(state.highest_price)
        .bind(state.trailing_stop_price)
        .bind(state.updated_at)
        .bind(state.user_id)
        .bind(&state.symbol)
        .bind(state.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update trailing stop for {}: {}", state.symbol, e);
            DatabaseError::QueryError(format!("Failed to update trailing stop: {}", e))
        })?
        .rows_affected();

        Ok(rows_affected == 1)
    }
}

#[derive(Clone)]
pub struct WatchlistRepository {
    pool: DbPool,
}

impl WatchlistRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Add or update a watchlist entry.
    pub async fn upsert(&self, entry: &WatchlistEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO watchlist (user_id, symbol, target_price, notes, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, symbol) DO UPDATE SET
                target_price = excluded.target_price,
                notes = excluded.notes
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.symbol)
        .bind(entry.target_price)
        .bind(&entry.notes)
        .bind(entry.added_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save watchlist entry {}: {}", entry.symbol, e);
            DatabaseError::QueryError(format!("Failed to save watchlist entry: {}", e))
        })?;

        Ok(())
    }

    /// Returns `false` when the symbol was not on the list.
    pub async fn remove(&self, user_id: UserId, symbol: &str) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query("DELETE FROM watchlist WHERE user_id = ?1 AND symbol = ?2")
            .bind(user_id)
            .bind(symbol)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to remove watchlist entry {}: {}", symbol, e);
                DatabaseError::QueryError(format!("Failed to remove watchlist entry: {}", e))
            })?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<WatchlistEntry>, DatabaseError> {
        let records = sqlx::query_as::<_, WatchlistRecord>(
            "SELECT * FROM watchlist WHERE user_id = ?1 ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get watchlist for user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to get watchlist: {}", e))
        })?;

        Ok(records.into_iter().map(WatchlistEntry::from).collect())
    }
}

/// Maps users to the chat their alerts go to.
#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, user_id: UserId, chat_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, chat_id, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET chat_id = excluded.chat_id
            "#,
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to register user {}: {}", user_id, e);
            DatabaseError::QueryError(format!("Failed to register user: {}", e))
        })?;

        Ok(())
    }

    pub async fn chat_id(&self, user_id: UserId) -> Result<Option<String>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get user {}: {}", user_id, e);
                DatabaseError::QueryError(format!("Failed to get user: {}", e))
            })?;

        Ok(record.map(|r| r.chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::transaction::Side;
    use crate::persistence::init_database;
    use chrono::{Duration, TimeZone};

    fn new_tx(side: Side, quantity: f64, price: f64, minute: i64) -> NewTransaction {
        NewTransaction {
            user_id: 42,
            symbol: "VIC".to_string(),
            side,
            quantity,
            price,
            requested_at: Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    #[tokio::test]
    async fn test_ledger_record_and_position() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = LedgerRepository::new(pool);

        repo.record(new_tx(Side::Buy, 100.0, 50_000.0, 0)).await.unwrap();
        repo.record(new_tx(Side::Buy, 50.0, 55_000.0, 1)).await.unwrap();

        let position = repo.position(42, "VIC").await.unwrap().unwrap();
        assert_eq!(position.quantity, 150.0);
        assert!((position.avg_cost - 51_666.666_666).abs() < 0.01);

        let log = repo.transactions(42, "VIC").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].side, Side::Buy);
        assert_eq!(log[1].price, 55_000.0);
    }

    #[tokio::test]
    async fn test_ledger_closes_position_at_zero() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = LedgerRepository::new(pool);

        repo.record(new_tx(Side::Buy, 10.0, 100.0, 0)).await.unwrap();
        let recorded = repo.record(new_tx(Side::Sell, 15.0, 90.0, 1)).await.unwrap();
        assert_eq!(recorded.update.change, PositionChange::Delete);
        assert_eq!(recorded.update.oversold, 5.0);

        assert!(repo.position(42, "VIC").await.unwrap().is_none());
        assert_eq!(repo.transactions(42, "VIC").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_clamps_backdated_timestamp() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = LedgerRepository::new(pool);

        let first = repo.record(new_tx(Side::Buy, 10.0, 100.0, 10)).await.unwrap();
        let second = repo.record(new_tx(Side::Buy, 5.0, 110.0, 0)).await.unwrap();

        assert!(!first.clamped);
        assert!(second.clamped);
        assert_eq!(second.transaction.executed_at, first.transaction.executed_at);

        let log = repo.transactions(42, "VIC").await.unwrap();
        assert_eq!(log[0].id, first.transaction.id);
        assert_eq!(log[1].id, second.transaction.id);
    }

    #[tokio::test]
    async fn test_trailing_stop_compare_and_set() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = TrackingRepository::new(pool);

        let state = TrailingStopState::new(42, "HPG".to_string(), 0.1, Some(30.0), Utc::now());
        let stored = repo.replace_trailing_stop(&state).await.unwrap();
        assert_eq!(stored.version, 0);

        let mut mine = stored.clone();
        mine.observe(36.0, Utc::now());
        let mut stale = stored.clone();
        stale.observe(33.0, Utc::now());

        assert!(repo.compare_and_set_trailing_stop(&mine).await.unwrap());
        assert!(!repo.compare_and_set_trailing_stop(&stale).await.unwrap());

        let current = repo.trailing_stop(42, "HPG").await.unwrap().unwrap();
        assert_eq!(current.highest_price, 36.0);
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn test_enabled_users() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let repo = TrackingRepository::new(pool);

        for (user_id, enabled) in [(1, true), (2, false), (3, true)] {
            repo.upsert_config(&TrackingConfig {
                user_id,
                enabled,
                stoploss_pct: 0.08,
                take_profit_pct: 0.15,
                volume_ma_days: 20,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.enabled_users().await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_watchlist_and_users() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let watchlist = WatchlistRepository::new(pool.clone());
        let users = UserRepository::new(pool);

        watchlist
            .upsert(&WatchlistEntry {
                user_id: 7,
                symbol: "FPT".to_string(),
                target_price: Some(95_000.0),
                notes: Some("dip buy".to_string()),
                added_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(watchlist.list(7).await.unwrap().len(), 1);
        assert!(watchlist.remove(7, "FPT").await.unwrap());
        assert!(!watchlist.remove(7, "FPT").await.unwrap());

        assert_eq!(users.chat_id(7).await.unwrap(), None);
        users.register(7, "chat-7").await.unwrap();
        users.register(7, "chat-7b").await.unwrap();
        assert_eq!(users.chat_id(7).await.unwrap(), Some("chat-7b".to_string()));
    }
}
