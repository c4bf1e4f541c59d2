//! Stock position tracker
//!
//! Keeps a FIFO ledger of each user's trades, watches their holdings through
//! the trading session and sends exit alerts (trailing stop, stoploss,
//! take-profit, volume anomalies) to their notification channel.

pub mod application;
pub mod clock;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod task_runner;
