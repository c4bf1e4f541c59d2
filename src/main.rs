use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stock_tracker::application::actors::{spawn_tick_worker, TickMessage};
use stock_tracker::application::handlers::app;
use stock_tracker::application::services::{
    AlertDispatcher, JobScheduler, Ledger, PendingResetStore, TrackerParts, TrackerService,
};
use stock_tracker::clock::{Clock, SystemClock};
use stock_tracker::config::TrackerConfig;
use stock_tracker::domain::repositories::{MarketDataGateway, NotificationSink};
use stock_tracker::domain::services::session::TradingSession;
use stock_tracker::infrastructure::{HttpMarketDataGateway, LogSink, TelegramSink};
use stock_tracker::persistence::repository::{
    LedgerRepository, TrackingRepository, UserRepository, WatchlistRepository,
};
use stock_tracker::persistence::{init_database_with, DatabaseConfig};
use stock_tracker::rate_limit::{create_rate_limiter, RateLimiterConfig};
use stock_tracker::task_runner::BackoffConfig;

const TICK_QUEUE_CAPACITY: usize = 256;
const MAX_BODY_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stock_tracker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TrackerConfig::from_env();
    let db_config = DatabaseConfig::from_env();
    info!(
        offset = %config.exchange_offset(),
        poll_minutes = config.poll_interval_minutes,
        "Stock tracker starting"
    );

    let pool = init_database_with(&db_config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let gateway: Arc<dyn MarketDataGateway> = Arc::new(HttpMarketDataGateway::new(
        &config.market_data_base_url,
        config.market_data_timeout(),
    )?);

    let sink: Arc<dyn NotificationSink> = match config.telegram_bot_token.as_deref() {
        Some(token) => Arc::new(TelegramSink::new(token, config.notification_timeout())?),
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, alerts will only be logged");
            Arc::new(LogSink)
        }
    };

    let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
    let session = TradingSession::new(config.exchange_offset(), config.poll_interval());

    let service = Arc::new(TrackerService::new(
        TrackerParts {
            ledger: Ledger::new(
                LedgerRepository::new(pool.clone()),
                clock.clone(),
                config.fifo_cache_capacity,
            ),
            tracking: TrackingRepository::new(pool.clone()),
            watchlist: WatchlistRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            gateway,
            dispatcher: AlertDispatcher::new(
                sink,
                UserRepository::new(pool.clone()),
                config.notification_timeout(),
            ),
            scheduler: JobScheduler::new(session, clock.clone(), tick_tx.clone()),
            resets: PendingResetStore::new(clock.clone(), config.reset_ttl()),
            clock,
        },
        &config,
    ));

    let worker = spawn_tick_worker(service.clone(), tick_rx);

    // Jobs armed before a restart are gone; re-arm what is left of today.
    service.arm_enabled_users().await?;
    let rollover = tokio::spawn(service.clone().run_daily_rollover(BackoffConfig::default()));

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.api_requests_per_minute,
    });
    let app = app(service.clone(), limiter, MAX_BODY_BYTES);

    let addr: SocketAddr = config.http_bind_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");

    rollover.abort();
    service.shutdown();
    if tick_tx.send(TickMessage::Shutdown).await.is_err() {
        warn!("Tick worker already stopped");
    }
    if let Err(e) = worker.await {
        error!("Tick worker ended abnormally: {}", e);
    }
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
