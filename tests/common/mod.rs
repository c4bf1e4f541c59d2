#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use stock_tracker::application::actors::TickMessage;
use stock_tracker::application::services::{
    AlertDispatcher, JobScheduler, Ledger, PendingResetStore, TrackerParts, TrackerService,
};
use stock_tracker::clock::FixedClock;
use stock_tracker::config::TrackerConfig;
use stock_tracker::domain::errors::{DeliveryError, MarketDataError};
use stock_tracker::domain::repositories::{
    MarketDataGateway, MarketDataResult, MarketSnapshot, NotificationSink,
};
use stock_tracker::domain::services::session::TradingSession;
use stock_tracker::persistence::init_database;
use stock_tracker::persistence::repository::{
    LedgerRepository, TrackingRepository, UserRepository, WatchlistRepository,
};

/// A trading-day instant in exchange time (UTC+7); 2026-10-16 is a Friday.
pub fn local(h: u32, m: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(7 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 10, 16, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Gateway answering from a table; symbols without an entry are unavailable.
#[derive(Default)]
pub struct ScriptedGateway {
    quotes: Mutex<HashMap<String, MarketSnapshot>>,
}

impl ScriptedGateway {
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.set_snapshot(symbol, MarketSnapshot::price_only(price));
    }

    pub fn set_snapshot(&self, symbol: &str, snapshot: MarketSnapshot) {
        self.quotes.lock().unwrap().insert(symbol.to_string(), snapshot);
    }

    pub fn remove(&self, symbol: &str) {
        self.quotes.lock().unwrap().remove(symbol);
    }

    fn lookup(&self, symbol: &str) -> MarketDataResult<MarketSnapshot> {
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| MarketDataError::Unavailable {
                symbol: symbol.to_string(),
            })
    }
}

#[async_trait]
impl MarketDataGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_price(&self, symbol: &str) -> MarketDataResult<f64> {
        self.lookup(symbol).map(|s| s.price)
    }

    async fn get_price_and_volume(
        &self,
        symbol: &str,
        _volume_window_days: u32,
    ) -> MarketDataResult<MarketSnapshot> {
        self.lookup(symbol)
    }
}

/// Sink that keeps every message, or refuses them all when `failing`.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(String, String)>>,
    pub failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        if *self.failing.lock().unwrap() {
            return Err(DeliveryError::Unreachable("chat offline".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub service: Arc<TrackerService>,
    pub clock: Arc<FixedClock>,
    pub gateway: Arc<ScriptedGateway>,
    pub sink: Arc<RecordingSink>,
    pub ticks: mpsc::Receiver<TickMessage>,
}

pub async fn harness(now: DateTime<Utc>) -> Harness {
    let pool = init_database("sqlite::memory:").await.unwrap();
    let config = TrackerConfig::default();
    let clock = Arc::new(FixedClock::new(now));
    let gateway = Arc::new(ScriptedGateway::default());
    let sink = Arc::new(RecordingSink::default());
    let (tx, rx) = mpsc::channel(64);

    let session = TradingSession::new(config.exchange_offset(), config.poll_interval());
    let service = TrackerService::new(
        TrackerParts {
            ledger: Ledger::new(LedgerRepository::new(pool.clone()), clock.clone(), 16),
            tracking: TrackingRepository::new(pool.clone()),
            watchlist: WatchlistRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            gateway: gateway.clone(),
            dispatcher: AlertDispatcher::new(
                sink.clone(),
                UserRepository::new(pool.clone()),
                config.notification_timeout(),
            ),
            scheduler: JobScheduler::new(session, clock.clone(), tx),
            resets: PendingResetStore::new(clock.clone(), config.reset_ttl()),
            clock: clock.clone(),
        },
        &config,
    );

    Harness {
        service: Arc::new(service),
        clock,
        gateway,
        sink,
        ticks: rx,
    }
}
