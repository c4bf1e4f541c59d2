//! Persistence Layer
//!
//! SQLite storage for the transaction ledger, cached positions, tracking
//! settings, trailing-stop state, watchlists and user channels. Uses sqlx with
//! idempotent migrations run at start-up.
//!
//! # Database Schema
//!
//! ## transactions
//! Append-only log; replay order is `(ts, id)`.
//!
//! ## positions
//! One row per `(user_id, symbol)` while quantity is positive.
//!
//! ## trailing_stop
//! One row per `(user_id, symbol)`; `version` is bumped on every write and
//! used as a compare-and-set token.

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Initialize the database connection pool with default settings.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    })
    .await
}

/// Initialize the pool described by `config` and run migrations.
///
/// An in-memory database lives only as long as its connection, so it is held
/// on a single connection that is never recycled.
pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    let in_memory = config.url.contains(":memory:");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            chat_id TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "transactions",
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            quantity REAL NOT NULL CHECK(quantity > 0),
            price REAL NOT NULL CHECK(price > 0),
            ts DATETIME NOT NULL
        )
        "#,
    ),
    (
        "positions",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            user_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            quantity REAL NOT NULL,
            avg_cost REAL NOT NULL,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, symbol)
        )
        "#,
    ),
    (
        "tracking_config",
        r#"
        CREATE TABLE IF NOT EXISTS tracking_config (
            user_id INTEGER PRIMARY KEY,
            enabled BOOLEAN NOT NULL DEFAULT 0,
            stoploss_pct REAL NOT NULL,
            take_profit_pct REAL NOT NULL,
            volume_ma_days INTEGER NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    ),
    (
        "stock_stoploss",
        r#"
        CREATE TABLE IF NOT EXISTS stock_stoploss (
            user_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            stoploss_pct REAL NOT NULL,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, symbol)
        )
        "#,
    ),
    (
        "trailing_stop",
        r#"
        CREATE TABLE IF NOT EXISTS trailing_stop (
            user_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT 1,
            trailing_pct REAL NOT NULL,
            highest_price REAL NOT NULL,
            trailing_stop_price REAL NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            updated_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, symbol)
        )
        "#,
    ),
    (
        "watchlist",
        r#"
        CREATE TABLE IF NOT EXISTS watchlist (
            user_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            target_price REAL,
            notes TEXT,
            added_at DATETIME NOT NULL,
            PRIMARY KEY (user_id, symbol)
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_transactions_replay ON transactions(user_id, symbol, ts, id)",
    "CREATE INDEX IF NOT EXISTS idx_tracking_enabled ON tracking_config(enabled)",
];

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (table, ddl) in MIGRATIONS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", table, e))
        })?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/stock_tracker.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/stock_tracker.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('users', 'transactions', 'positions', 'tracking_config', \
              'stock_stoploss', 'trailing_stop', 'watchlist')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 7);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/stock_tracker.db");
        assert_eq!(config.max_connections, 5);
    }
}
