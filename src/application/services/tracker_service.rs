//! Tracker Service
//!
//! The one entry point the command layer and the scheduler talk to. Owns the
//! ledger, scheduler, signal engine and dispatcher, and serializes ticks per
//! user so two fires for the same user never interleave.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::application::actors::tick_worker::{TickHandler, TickRequest};
use crate::application::services::dispatcher::{
    AlertDispatcher, DispatchOutcome, TickReport, TickTrigger,
};
use crate::application::services::ledger::Ledger;
use crate::application::services::pending_reset::PendingResetStore;
use crate::application::services::scheduler::{JobScheduler, ScheduledJob};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::domain::entities::position::Position;
use crate::domain::entities::tracking::{StockStopLoss, TrackingConfig, TrailingStopState};
use crate::domain::entities::transaction::{Lot, Side};
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::entities::UserId;
use crate::domain::errors::{MarketDataError, TrackerError, TrackerResult, ValidationError};
use crate::domain::repositories::{MarketDataGateway, MarketSnapshot};
use crate::domain::services::signal_engine::{PositionContext, SignalEngine, SymbolReport};
use crate::domain::value_objects::percentage::{validate_take_profit, Percentage};
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::symbol::normalize_symbol;
use crate::persistence::repository::{
    RecordedTransaction, TrackingRepository, UserRepository, WatchlistRepository,
};
use crate::task_runner::{run_supervised, BackoffConfig};

/// Defaults applied to a user's first tracking config.
#[derive(Debug, Clone, Copy)]
pub struct TrackingDefaults {
    pub stoploss_pct: f64,
    pub take_profit_pct: f64,
    pub volume_ma_days: u32,
}

impl From<&TrackerConfig> for TrackingDefaults {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            stoploss_pct: config.default_stoploss_pct,
            take_profit_pct: config.default_take_profit_pct,
            volume_ma_days: config.default_volume_ma_days,
        }
    }
}

/// Partial update of a user's tracking settings.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TrackingSettingsUpdate {
    pub stoploss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub volume_ma_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: String,
    pub quantity: f64,
    /// Running weighted average, unchanged by sells.
    pub avg_cost: f64,
    /// FIFO cost basis of the lots still held.
    pub effective_avg_cost: f64,
    pub lots: Vec<Lot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PnlSummary {
    pub symbols: Vec<SymbolReport>,
    pub total_pnl: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingStatus {
    pub config: TrackingConfig,
    pub symbol_stoplosses: Vec<StockStopLoss>,
    pub trailing_stops: Vec<TrailingStopState>,
    pub scheduled_jobs: Vec<ScheduledJob>,
}

pub struct TrackerService {
    ledger: Ledger,
    tracking: TrackingRepository,
    watchlist: WatchlistRepository,
    users: UserRepository,
    gateway: Arc<dyn MarketDataGateway>,
    dispatcher: AlertDispatcher,
    scheduler: JobScheduler,
    engine: SignalEngine,
    resets: PendingResetStore,
    clock: Arc<dyn Clock>,
    defaults: TrackingDefaults,
    market_data_timeout: Duration,
    trailing_update_retries: u32,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Collaborators the service is assembled from.
pub struct TrackerParts {
    pub ledger: Ledger,
    pub tracking: TrackingRepository,
    pub watchlist: WatchlistRepository,
    pub users: UserRepository,
    pub gateway: Arc<dyn MarketDataGateway>,
    pub dispatcher: AlertDispatcher,
    pub scheduler: JobScheduler,
    pub resets: PendingResetStore,
    pub clock: Arc<dyn Clock>,
}

impl TrackerService {
    pub fn new(parts: TrackerParts, config: &TrackerConfig) -> Self {
        Self {
            ledger: parts.ledger,
            tracking: parts.tracking,
            watchlist: parts.watchlist,
            users: parts.users,
            gateway: parts.gateway,
            dispatcher: parts.dispatcher,
            scheduler: parts.scheduler,
            engine: SignalEngine::new(config.volume_thresholds()),
            resets: parts.resets,
            clock: parts.clock,
            defaults: TrackingDefaults::from(config),
            market_data_timeout: config.market_data_timeout(),
            trailing_update_retries: config.trailing_update_retries,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    // ----- users -----

    pub async fn register_user(&self, user_id: UserId, chat_id: &str) -> TrackerResult<()> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(ValidationError::InvalidChannel("chat id cannot be empty".to_string()).into());
        }
        self.users.register(user_id, chat_id).await?;
        info!(user_id, "Registered notification channel");
        Ok(())
    }

    // ----- ledger -----

    pub async fn record_transaction(
        &self,
        user_id: UserId,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> TrackerResult<RecordedTransaction> {
        self.ledger
            .record_transaction(user_id, symbol, side, quantity, price)
            .await
    }

    pub async fn get_positions(&self, user_id: UserId) -> TrackerResult<Vec<PositionView>> {
        let positions = self.ledger.positions(user_id).await?;
        let mut views = Vec::with_capacity(positions.len());
        for position in positions {
            let lots = self.ledger.fifo_lots(user_id, &position.symbol).await?;
            let effective_avg_cost = self
                .ledger
                .effective_average_cost(user_id, &position.symbol)
                .await?
                .unwrap_or(position.avg_cost);
            views.push(PositionView {
                symbol: position.symbol,
                quantity: position.quantity,
                avg_cost: position.avg_cost,
                effective_avg_cost,
                lots: lots.as_ref().clone(),
            });
        }
        Ok(views)
    }

    /// Unrealized P&L at current prices; unpriced symbols are reported as such.
    pub async fn get_pnl(&self, user_id: UserId) -> TrackerResult<PnlSummary> {
        let positions = self.ledger.positions(user_id).await?;
        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let prices = self.fetch_prices(&symbols).await;

        let mut reports = Vec::with_capacity(positions.len());
        for position in &positions {
            let avg_cost = self.cost_basis(position).await;
            let price = prices.get(&position.symbol).copied().flatten();
            reports.push(SymbolReport {
                symbol: position.symbol.clone(),
                quantity: position.quantity,
                avg_cost,
                price,
                pnl: price.map(|p| (p - avg_cost) * position.quantity),
                signals: Vec::new(),
            });
        }

        let resolved: Vec<f64> = reports.iter().filter_map(|r| r.pnl).collect();
        let total_pnl = (!resolved.is_empty()).then(|| resolved.iter().sum::<f64>());
        Ok(PnlSummary {
            symbols: reports,
            total_pnl,
        })
    }

    // ----- tracking settings -----

    async fn config_or_default(&self, user_id: UserId) -> TrackerResult<TrackingConfig> {
        Ok(self
            .tracking
            .config(user_id)
            .await?
            .unwrap_or_else(|| TrackingConfig {
                user_id,
                enabled: false,
                stoploss_pct: self.defaults.stoploss_pct,
                take_profit_pct: self.defaults.take_profit_pct,
                volume_ma_days: self.defaults.volume_ma_days,
                updated_at: self.clock.now(),
            }))
    }

    /// Turn monitoring on or off, arming or disarming the user's session jobs.
    ///
    /// Settings given alongside the toggle are validated first and written in
    /// the same upsert; nothing is stored if any of them is rejected.
    pub async fn set_tracking_enabled(
        &self,
        user_id: UserId,
        enabled: bool,
        settings: TrackingSettingsUpdate,
    ) -> TrackerResult<TrackingStatus> {
        let mut config = self.config_or_default(user_id).await?;
        apply_settings(&mut config, &settings)?;
        config.enabled = enabled;
        config.updated_at = self.clock.now();
        self.tracking.upsert_config(&config).await?;

        if enabled {
            let jobs = self.scheduler.arm(user_id);
            if jobs.is_empty() {
                info!(user_id, "Tracking enabled, no session windows left today");
            }
        } else {
            self.scheduler.disarm(user_id);
        }

        self.get_tracking_status(user_id).await
    }

    pub async fn update_tracking_settings(
        &self,
        user_id: UserId,
        update: TrackingSettingsUpdate,
    ) -> TrackerResult<TrackingConfig> {
        let mut config = self.config_or_default(user_id).await?;
        apply_settings(&mut config, &update)?;
        config.updated_at = self.clock.now();
        self.tracking.upsert_config(&config).await?;
        Ok(config)
    }

    /// Override the stoploss percentage for one symbol.
    pub async fn set_symbol_stop_loss(
        &self,
        user_id: UserId,
        symbol: &str,
        stoploss_pct: f64,
    ) -> TrackerResult<StockStopLoss> {
        let symbol = normalize_symbol(symbol)?;
        let pct = Percentage::new(stoploss_pct)?;
        self.tracking
            .set_symbol_stoploss(user_id, &symbol, pct.value())
            .await?;
        info!(user_id, symbol = %symbol, stoploss = %pct, "Symbol stoploss set");
        Ok(StockStopLoss {
            user_id,
            symbol,
            stoploss_pct: pct.value(),
        })
    }

    /// Enable a trailing stop at `trailing_pct`, or disable it with `None`.
    ///
    /// Enabling seeds the high-water mark from the current price when one is
    /// available; otherwise the first priced tick seeds it. Re-enabling an
    /// armed stop keeps its high-water mark and recomputes the stop price.
    pub async fn set_trailing_stop(
        &self,
        user_id: UserId,
        symbol: &str,
        trailing_pct: Option<f64>,
    ) -> TrackerResult<TrailingStopState> {
        let symbol = normalize_symbol(symbol)?;
        let now = self.clock.now();

        let state = match trailing_pct {
            Some(pct) => {
                let pct = Percentage::new(pct)?;
                let reference = match self.fetch_price(&symbol).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        warn!(symbol = %symbol, "Trailing stop armed without reference price: {}", e);
                        None
                    }
                };
                match self.tracking.trailing_stop(user_id, &symbol).await? {
                    Some(mut existing) if existing.enabled => {
                        existing.retune(pct.value(), reference, now);
                        existing
                    }
                    _ => TrailingStopState::new(user_id, symbol.clone(), pct.value(), reference, now),
                }
            }
            None => {
                let mut state = self
                    .tracking
                    .trailing_stop(user_id, &symbol)
                    .await?
                    .ok_or_else(|| {
                        TrackerError::NotFound(format!("no trailing stop for {}", symbol))
                    })?;
                state.enabled = false;
                state.updated_at = now;
                state
            }
        };

        let stored = self.tracking.replace_trailing_stop(&state).await?;
        info!(
            user_id,
            symbol = %stored.symbol,
            enabled = stored.enabled,
            highest = stored.highest_price,
            stop = stored.trailing_stop_price,
            "Trailing stop updated"
        );
        Ok(stored)
    }

    pub async fn get_tracking_status(&self, user_id: UserId) -> TrackerResult<TrackingStatus> {
        Ok(TrackingStatus {
            config: self.config_or_default(user_id).await?,
            symbol_stoplosses: self.tracking.symbol_stoplosses(user_id).await?,
            trailing_stops: self.tracking.trailing_stops(user_id).await?,
            scheduled_jobs: self.scheduler.scheduled_jobs(user_id),
        })
    }

    pub fn scheduled_jobs(&self, user_id: UserId) -> Vec<ScheduledJob> {
        self.scheduler.scheduled_jobs(user_id)
    }

    // ----- watchlist -----

    pub async fn add_to_watchlist(
        &self,
        user_id: UserId,
        symbol: &str,
        target_price: Option<f64>,
        notes: Option<String>,
    ) -> TrackerResult<WatchlistEntry> {
        let symbol = normalize_symbol(symbol)?;
        let target_price = target_price
            .map(|p| Price::new(p).map(|p| p.value()))
            .transpose()?;
        let entry = WatchlistEntry {
            user_id,
            symbol,
            target_price,
            notes: notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            added_at: self.clock.now(),
        };
        self.watchlist.upsert(&entry).await?;
        Ok(entry)
    }

    pub async fn remove_from_watchlist(&self, user_id: UserId, symbol: &str) -> TrackerResult<()> {
        let symbol = normalize_symbol(symbol)?;
        if !self.watchlist.remove(user_id, &symbol).await? {
            return Err(TrackerError::NotFound(format!("{} is not on the watchlist", symbol)));
        }
        Ok(())
    }

    pub async fn get_watchlist(&self, user_id: UserId) -> TrackerResult<Vec<WatchlistEntry>> {
        Ok(self.watchlist.list(user_id).await?)
    }

    // ----- reset -----

    pub fn request_reset(&self, user_id: UserId) -> chrono::DateTime<Utc> {
        let expires_at = self.resets.request(user_id);
        info!(user_id, %expires_at, "Account reset requested");
        expires_at
    }

    /// Wipe the user's ledger, settings and watchlist and stop their jobs.
    pub async fn confirm_reset(&self, user_id: UserId) -> TrackerResult<()> {
        self.resets.confirm(user_id)?;

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        self.scheduler.disarm(user_id);
        self.ledger.clear_user(user_id).await?;
        warn!(user_id, "Account reset completed");
        Ok(())
    }

    pub fn cancel_reset(&self, user_id: UserId) -> bool {
        self.resets.cancel(user_id)
    }

    // ----- ticks -----

    /// Evaluate and notify now, outside the session schedule.
    pub async fn tick(&self, user_id: UserId) -> TrackerResult<(TickReport, DispatchOutcome)> {
        self.run_tick(user_id, TickTrigger::OnDemand).await
    }

    pub async fn run_scheduled_tick(&self, request: TickRequest) {
        let started = std::time::Instant::now();
        match self
            .run_tick(request.user_id, TickTrigger::Scheduled(request.window))
            .await
        {
            Ok((report, outcome)) => debug!(
                user_id = request.user_id,
                window = %request.window,
                symbols = report.symbols.len(),
                ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scheduled tick finished"
            ),
            Err(e) => error!(
                user_id = request.user_id,
                window = %request.window,
                "Scheduled tick failed: {}",
                e
            ),
        }
    }

    async fn run_tick(
        &self,
        user_id: UserId,
        trigger: TickTrigger,
    ) -> TrackerResult<(TickReport, DispatchOutcome)> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let local_time = now.with_timezone(&self.scheduler.session().offset());

        let config = self.config_or_default(user_id).await?;
        let positions = self.ledger.positions(user_id).await?;
        let watchlist = self.watchlist.list(user_id).await?;
        let overrides: HashMap<String, f64> = self
            .tracking
            .symbol_stoplosses(user_id)
            .await?
            .into_iter()
            .map(|s| (s.symbol, s.stoploss_pct))
            .collect();
        let mut trailing: HashMap<String, TrailingStopState> = self
            .tracking
            .trailing_stops(user_id)
            .await?
            .into_iter()
            .map(|s| (s.symbol.clone(), s))
            .collect();

        let symbols: BTreeSet<String> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .chain(
                watchlist
                    .iter()
                    .filter(|w| w.target_price.is_some())
                    .map(|w| w.symbol.clone()),
            )
            .collect();
        let symbols: Vec<String> = symbols.into_iter().collect();
        let snapshots = self.fetch_snapshots(&symbols, config.volume_ma_days).await;

        let mut reports = Vec::with_capacity(positions.len());
        for position in &positions {
            let avg_cost = self.cost_basis(position).await;
            let ctx = PositionContext {
                symbol: &position.symbol,
                quantity: position.quantity,
                avg_cost,
                stoploss_pct: overrides
                    .get(&position.symbol)
                    .copied()
                    .unwrap_or(config.stoploss_pct),
                take_profit_pct: config.take_profit_pct,
            };

            let report = match snapshots.get(&position.symbol).copied().flatten() {
                Some(snapshot) => {
                    let state = trailing.remove(&position.symbol);
                    self.evaluate_position(&ctx, &snapshot, state, local_time.time(), now)
                        .await
                }
                None => SymbolReport::unavailable(&ctx),
            };
            reports.push(report);
        }

        let watch_signals: Vec<_> = watchlist
            .iter()
            .filter_map(|entry| {
                let snapshot = snapshots.get(&entry.symbol).copied().flatten()?;
                self.engine.evaluate_watchlist(entry, snapshot.price)
            })
            .collect();

        let report = TickReport {
            user_id,
            trigger,
            generated_at: now,
            local_time,
            symbols: reports,
            watchlist: watch_signals,
        };

        let outcome = self.dispatcher.dispatch(&report).await;
        Ok((report, outcome))
    }

    /// Evaluate one symbol and persist a ratcheted trailing stop.
    ///
    /// A concurrent writer makes the compare-and-set fail; the state is then
    /// re-read and the evaluation repeated, a bounded number of times.
    async fn evaluate_position(
        &self,
        ctx: &PositionContext<'_>,
        snapshot: &MarketSnapshot,
        mut state: Option<TrailingStopState>,
        local_time: chrono::NaiveTime,
        now: chrono::DateTime<Utc>,
    ) -> SymbolReport {
        let mut attempt = 0;
        loop {
            let mut working = state.clone();
            let (report, effect) =
                self.engine
                    .evaluate(ctx, snapshot, working.as_mut(), local_time, now);

            let Some(updated) = working.filter(|_| effect.raised) else {
                return report;
            };

            match self.tracking.compare_and_set_trailing_stop(&updated).await {
                Ok(true) => return report,
                Ok(false) if attempt < self.trailing_update_retries => {
                    attempt += 1;
                    debug!(symbol = ctx.symbol, attempt, "Trailing stop changed concurrently, retrying");
                    match self.tracking.trailing_stop(updated.user_id, ctx.symbol).await {
                        Ok(fresh) => state = fresh,
                        Err(e) => {
                            error!(symbol = ctx.symbol, "Failed to reload trailing stop: {}", e);
                            return report;
                        }
                    }
                }
                Ok(false) => {
                    warn!(symbol = ctx.symbol, "Trailing stop update lost after retries");
                    return report;
                }
                Err(e) => {
                    error!(symbol = ctx.symbol, "Failed to persist trailing stop: {}", e);
                    return report;
                }
            }
        }
    }

    // ----- scheduling lifecycle -----

    /// Arm every user with tracking enabled; used at start-up and rollover.
    pub async fn arm_enabled_users(&self) -> TrackerResult<usize> {
        let users = self.tracking.enabled_users().await?;
        for user_id in &users {
            self.scheduler.arm(*user_id);
        }
        info!(users = users.len(), "Armed tracking for enabled users");
        Ok(users.len())
    }

    /// Re-arm enabled users shortly after each local midnight, forever.
    pub async fn run_daily_rollover(self: Arc<Self>, backoff: BackoffConfig) {
        run_supervised("daily_rollover", backoff, || {
            let service = self.clone();
            async move {
                let now = service.clock.now();
                let next = service.scheduler.session().next_rollover(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(?wait, "Sleeping until rollover");
                tokio::time::sleep(wait).await;
                service
                    .arm_enabled_users()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        })
        .await;
    }

    pub fn shutdown(&self) {
        self.scheduler.disarm_all();
    }

    // ----- helpers -----

    fn user_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        match self.user_locks.lock() {
            Ok(mut locks) => locks.entry(user_id).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(user_id).or_default().clone(),
        }
    }

    async fn cost_basis(&self, position: &Position) -> f64 {
        match self
            .ledger
            .effective_average_cost(position.user_id, &position.symbol)
            .await
        {
            Ok(Some(avg)) => avg,
            Ok(None) => position.avg_cost,
            Err(e) => {
                warn!(symbol = %position.symbol, "FIFO replay failed, using running average: {}", e);
                position.avg_cost
            }
        }
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        match tokio::time::timeout(self.market_data_timeout, self.gateway.get_price(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                timeout_ms: self.market_data_timeout.as_millis() as u64,
            }),
        }
    }

    async fn fetch_prices(&self, symbols: &[String]) -> HashMap<String, Option<f64>> {
        let lookups = symbols.iter().map(|symbol| async move {
            let price = match self.fetch_price(symbol).await {
                Ok(price) => Some(price),
                Err(e) => {
                    warn!(symbol = %symbol, gateway = self.gateway.name(), "Price unavailable: {}", e);
                    None
                }
            };
            (symbol.clone(), price)
        });
        join_all(lookups).await.into_iter().collect()
    }

    /// Fetch every symbol concurrently; failures map to `None` for this tick.
    async fn fetch_snapshots(
        &self,
        symbols: &[String],
        volume_window_days: u32,
    ) -> HashMap<String, Option<MarketSnapshot>> {
        let lookups = symbols.iter().map(|symbol| async move {
            let result = tokio::time::timeout(
                self.market_data_timeout,
                self.gateway.get_price_and_volume(symbol, volume_window_days),
            )
            .await
            .unwrap_or(Err(MarketDataError::Timeout {
                timeout_ms: self.market_data_timeout.as_millis() as u64,
            }));

            let snapshot = match result {
                Ok(snapshot) if snapshot.price.is_finite() && snapshot.price > 0.0 => {
                    Some(snapshot)
                }
                Ok(snapshot) => {
                    warn!(symbol = %symbol, price = snapshot.price, "Discarding unusable quote");
                    None
                }
                Err(e) => {
                    warn!(symbol = %symbol, gateway = self.gateway.name(), "Market data unavailable: {}", e);
                    None
                }
            };
            (symbol.clone(), snapshot)
        });
        join_all(lookups).await.into_iter().collect()
    }
}

#[async_trait]
impl TickHandler for TrackerService {
    async fn handle_tick(&self, request: TickRequest) {
        self.run_scheduled_tick(request).await;
    }
}

/// Validate and apply every field of `update`, leaving `config` untouched on
/// the first rejected value.
fn apply_settings(config: &mut TrackingConfig, update: &TrackingSettingsUpdate) -> TrackerResult<()> {
    let stoploss_pct = update
        .stoploss_pct
        .map(|pct| Percentage::new(pct).map(|p| p.value()))
        .transpose()?;
    let take_profit_pct = update.take_profit_pct.map(validate_take_profit).transpose()?;
    if update.volume_ma_days == Some(0) {
        return Err(ValidationError::InvalidQuantity(
            "volume window must be at least one day".to_string(),
        )
        .into());
    }

    if let Some(pct) = stoploss_pct {
        config.stoploss_pct = pct;
    }
    if let Some(pct) = take_profit_pct {
        config.take_profit_pct = pct;
    }
    if let Some(days) = update.volume_ma_days {
        config.volume_ma_days = days;
    }
    Ok(())
}
