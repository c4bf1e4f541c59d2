//! Position ledger: validated writes and cached FIFO replay.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::entities::position::Position;
use crate::domain::entities::transaction::{Lot, Side};
use crate::domain::entities::UserId;
use crate::domain::errors::TrackerResult;
use crate::domain::services::fifo::{compute_fifo_lots, weighted_average_cost};
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;
use crate::domain::value_objects::symbol::normalize_symbol;
use crate::persistence::models::NewTransaction;
use crate::persistence::repository::{LedgerRepository, RecordedTransaction};

type LotKey = (UserId, String);

/// Replayed lots plus a counter bumped by every invalidation. A replay that
/// started before an invalidation is not stored.
struct LotCache {
    entries: LruCache<LotKey, Arc<Vec<Lot>>>,
    generation: u64,
}

pub struct Ledger {
    repository: LedgerRepository,
    clock: Arc<dyn Clock>,
    lots: Mutex<LotCache>,
}

impl Ledger {
    pub fn new(repository: LedgerRepository, clock: Arc<dyn Clock>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            repository,
            clock,
            lots: Mutex::new(LotCache {
                entries: LruCache::new(capacity),
                generation: 0,
            }),
        }
    }

    /// Validate and append a BUY or SELL, updating the position.
    ///
    /// Invalid input is rejected before anything is written. Selling more
    /// than is held clamps the position to zero and is logged, not refused.
    pub async fn record_transaction(
        &self,
        user_id: UserId,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> TrackerResult<RecordedTransaction> {
        let symbol = normalize_symbol(symbol)?;
        let quantity = Quantity::new(quantity)?;
        let price = Price::new(price)?;

        let recorded = self
            .repository
            .record(NewTransaction {
                user_id,
                symbol: symbol.clone(),
                side,
                quantity: quantity.value(),
                price: price.value(),
                requested_at: self.clock.now(),
            })
            .await?;

        self.invalidate(user_id, &symbol);

        if recorded.update.oversold > 0.0 {
            warn!(
                user_id,
                symbol = %symbol,
                oversold = recorded.update.oversold,
                "SELL exceeds held quantity, position clamped to zero"
            );
        }
        if recorded.clamped {
            info!(
                user_id,
                symbol = %symbol,
                "Transaction timestamp moved forward to keep replay order"
            );
        }

        Ok(recorded)
    }

    /// Lots still held for a symbol, oldest first.
    pub async fn fifo_lots(&self, user_id: UserId, symbol: &str) -> TrackerResult<Arc<Vec<Lot>>> {
        let symbol = normalize_symbol(symbol)?;
        let key = (user_id, symbol);

        let generation = {
            let mut cache = self.cache();
            if let Some(lots) = cache.entries.get(&key) {
                return Ok(lots.clone());
            }
            cache.generation
        };

        let transactions = self.repository.transactions(user_id, &key.1).await?;
        let lots = Arc::new(compute_fifo_lots(&transactions));

        self.store_if_current(key, generation, lots.clone());
        Ok(lots)
    }

    /// FIFO cost basis, falling back to the running average when the log
    /// yields no lots.
    pub async fn effective_average_cost(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> TrackerResult<Option<f64>> {
        let lots = self.fifo_lots(user_id, symbol).await?;
        if let Some(avg) = weighted_average_cost(&lots) {
            return Ok(Some(avg));
        }
        let position = self.position(user_id, symbol).await?;
        Ok(position.map(|p| p.avg_cost))
    }

    pub async fn position(&self, user_id: UserId, symbol: &str) -> TrackerResult<Option<Position>> {
        let symbol = normalize_symbol(symbol)?;
        Ok(self.repository.position(user_id, &symbol).await?)
    }

    pub async fn positions(&self, user_id: UserId) -> TrackerResult<Vec<Position>> {
        Ok(self.repository.positions(user_id).await?)
    }

    /// Delete every ledger row the user owns and forget cached replays.
    pub async fn clear_user(&self, user_id: UserId) -> TrackerResult<()> {
        self.repository.delete_user_data(user_id).await?;
        self.invalidate_user(user_id);
        Ok(())
    }

    fn cache(&self) -> MutexGuard<'_, LotCache> {
        self.lots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cache `lots` unless an invalidation happened since `generation` was read.
    fn store_if_current(&self, key: LotKey, generation: u64, lots: Arc<Vec<Lot>>) -> bool {
        let mut cache = self.cache();
        if cache.generation != generation {
            return false;
        }
        cache.entries.put(key, lots);
        true
    }

    fn invalidate(&self, user_id: UserId, symbol: &str) {
        let mut cache = self.cache();
        cache.generation += 1;
        cache.entries.pop(&(user_id, symbol.to_string()));
    }

    fn invalidate_user(&self, user_id: UserId) {
        let mut cache = self.cache();
        cache.generation += 1;
        let keys: Vec<LotKey> = cache
            .entries
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            cache.entries.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::domain::errors::TrackerError;
    use crate::persistence::init_database;
    use chrono::{Duration, TimeZone, Utc};

    async fn ledger() -> (Ledger, Arc<FixedClock>) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap(),
        ));
        let ledger = Ledger::new(LedgerRepository::new(pool), clock.clone(), 16);
        (ledger, clock)
    }

    #[tokio::test]
    async fn test_two_buys_then_partial_sell() {
        let (ledger, clock) = ledger().await;

        ledger.record_transaction(1, "vic", Side::Buy, 100.0, 50_000.0).await.unwrap();
        clock.advance(Duration::minutes(1));
        ledger.record_transaction(1, "VIC", Side::Buy, 50.0, 55_000.0).await.unwrap();

        let position = ledger.position(1, "VIC").await.unwrap().unwrap();
        assert_eq!(position.quantity, 150.0);
        assert!((position.avg_cost - 51_666.67).abs() < 0.01);
        assert_eq!(
            *ledger.fifo_lots(1, "VIC").await.unwrap(),
            vec![Lot::new(100.0, 50_000.0), Lot::new(50.0, 55_000.0)]
        );

        clock.advance(Duration::minutes(1));
        ledger.record_transaction(1, "VIC", Side::Sell, 120.0, 60_000.0).await.unwrap();

        assert_eq!(
            *ledger.fifo_lots(1, "VIC").await.unwrap(),
            vec![Lot::new(30.0, 55_000.0)]
        );
        assert_eq!(
            ledger.effective_average_cost(1, "VIC").await.unwrap(),
            Some(55_000.0)
        );
        // The running average is untouched by the sale.
        let position = ledger.position(1, "VIC").await.unwrap().unwrap();
        assert!((position.avg_cost - 51_666.67).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_persisted() {
        let (ledger, _) = ledger().await;

        for (qty, price) in [(0.0, 10.0), (-5.0, 10.0), (5.0, 0.0), (5.0, f64::NAN)] {
            let result = ledger.record_transaction(1, "VIC", Side::Buy, qty, price).await;
            assert!(matches!(result, Err(TrackerError::InvalidInput(_))));
        }
        assert!(ledger.positions(1).await.unwrap().is_empty());
        assert!(ledger.fifo_lots(1, "VIC").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sell_without_position_records_only() {
        let (ledger, _) = ledger().await;

        let recorded = ledger.record_transaction(1, "HPG", Side::Sell, 10.0, 25_000.0).await.unwrap();
        assert_eq!(recorded.update.oversold, 10.0);
        assert!(ledger.position(1, "HPG").await.unwrap().is_none());
        assert_eq!(ledger.effective_average_cost(1, "HPG").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_is_invalidated_on_write() {
        let (ledger, clock) = ledger().await;

        ledger.record_transaction(1, "FPT", Side::Buy, 10.0, 100.0).await.unwrap();
        assert_eq!(ledger.fifo_lots(1, "FPT").await.unwrap().len(), 1);

        clock.advance(Duration::seconds(1));
        ledger.record_transaction(1, "FPT", Side::Buy, 10.0, 120.0).await.unwrap();
        assert_eq!(ledger.fifo_lots(1, "FPT").await.unwrap().len(), 2);
        assert_eq!(ledger.effective_average_cost(1, "FPT").await.unwrap(), Some(110.0));
    }

    #[tokio::test]
    async fn test_replay_started_before_a_write_is_not_cached() {
        let (ledger, _) = ledger().await;
        ledger.record_transaction(1, "FPT", Side::Buy, 10.0, 100.0).await.unwrap();

        // A reader replays the log, then a write lands before it stores.
        let generation = ledger.cache().generation;
        let stale = Arc::new(vec![Lot::new(10.0, 100.0)]);
        ledger.record_transaction(1, "FPT", Side::Buy, 10.0, 120.0).await.unwrap();

        assert!(!ledger.store_if_current((1, "FPT".to_string()), generation, stale));
        assert_eq!(ledger.fifo_lots(1, "FPT").await.unwrap().len(), 2);

        let generation = ledger.cache().generation;
        let fresh = ledger.fifo_lots(1, "FPT").await.unwrap();
        assert!(ledger.store_if_current((1, "FPT".to_string()), generation, fresh));
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let (ledger, _) = ledger().await;

        ledger.record_transaction(1, "MWG", Side::Buy, 10.0, 100.0).await.unwrap();
        ledger.record_transaction(1, "MWG", Side::Sell, 10.0, 110.0).await.unwrap();
        ledger.record_transaction(1, "MWG", Side::Buy, 5.0, 90.0).await.unwrap();

        assert_eq!(*ledger.fifo_lots(1, "MWG").await.unwrap(), vec![Lot::new(5.0, 90.0)]);
        let position = ledger.position(1, "MWG").await.unwrap().unwrap();
        assert_eq!(position.quantity, 5.0);
        assert_eq!(position.avg_cost, 90.0);
    }

    #[tokio::test]
    async fn test_clear_user_drops_ledger() {
        let (ledger, _) = ledger().await;

        ledger.record_transaction(1, "VIC", Side::Buy, 10.0, 100.0).await.unwrap();
        ledger.record_transaction(2, "VIC", Side::Buy, 10.0, 100.0).await.unwrap();
        ledger.fifo_lots(1, "VIC").await.unwrap();

        ledger.clear_user(1).await.unwrap();
        assert!(ledger.positions(1).await.unwrap().is_empty());
        assert!(ledger.fifo_lots(1, "VIC").await.unwrap().is_empty());
        assert_eq!(ledger.positions(2).await.unwrap().len(), 1);
    }
}
