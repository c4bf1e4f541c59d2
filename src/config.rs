use chrono::{FixedOffset, Offset, Utc};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::services::volume_profile::VolumeThresholds;

/// Runtime settings for the tracker process.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub http_bind_addr: String,
    pub api_requests_per_minute: u32,

    // Outbound collaborators
    pub telegram_bot_token: Option<String>,
    pub market_data_base_url: String,
    pub market_data_timeout_ms: u64,
    pub notification_timeout_ms: u64,

    // Exchange calendar
    pub exchange_utc_offset_hours: i32,
    pub poll_interval_minutes: u32,

    // Defaults for a user's first tracking config
    pub default_stoploss_pct: f64,
    pub default_take_profit_pct: f64,
    pub default_volume_ma_days: u32,

    pub volume_spike_z: f64,
    pub volume_drop_z: f64,

    pub reset_confirmation_ttl_seconds: u64,
    pub fifo_cache_capacity: usize,
    pub trailing_update_retries: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            http_bind_addr: "127.0.0.1:3000".to_string(),
            api_requests_per_minute: 100,

            telegram_bot_token: None,
            market_data_base_url: "http://127.0.0.1:8000".to_string(),
            market_data_timeout_ms: 5_000,
            notification_timeout_ms: 10_000,

            exchange_utc_offset_hours: 7, // HOSE, Asia/Ho_Chi_Minh
            poll_interval_minutes: 5,

            default_stoploss_pct: 0.08,
            default_take_profit_pct: 0.15,
            default_volume_ma_days: 20,

            volume_spike_z: 2.5,
            volume_drop_z: -2.0,

            reset_confirmation_ttl_seconds: 120,
            fifo_cache_capacity: 1024,
            trailing_update_retries: 3,
        }
    }
}

/// Apply `key` to `target` when it parses and passes `valid`; warn otherwise.
fn env_override<T>(key: &str, target: &mut T, valid: impl Fn(&T) -> bool, rule: &str)
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => *target = value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} ({}), using default: {}",
                key,
                value,
                rule,
                target
            );
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                key,
                raw,
                e,
                target
            );
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> TrackerConfig {
        let mut config = TrackerConfig::default();

        if let Ok(addr) = std::env::var("HTTP_BIND_ADDR") {
            if addr.parse::<std::net::SocketAddr>().is_ok() {
                config.http_bind_addr = addr;
            } else {
                tracing::warn!(
                    "Invalid HTTP_BIND_ADDR '{}', using default: {}",
                    addr,
                    config.http_bind_addr
                );
            }
        }

        env_override(
            "API_REQUESTS_PER_MINUTE",
            &mut config.api_requests_per_minute,
            |v| (1..=10_000).contains(v),
            "must be between 1 and 10000",
        );

        config.telegram_bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if let Ok(url) = std::env::var("MARKET_DATA_BASE_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.starts_with("http://") || url.starts_with("https://") {
                config.market_data_base_url = url;
            } else {
                tracing::warn!(
                    "Invalid MARKET_DATA_BASE_URL '{}', using default: {}",
                    url,
                    config.market_data_base_url
                );
            }
        }

        env_override(
            "MARKET_DATA_TIMEOUT_MS",
            &mut config.market_data_timeout_ms,
            |v| (100..=60_000).contains(v),
            "must be between 100 and 60000",
        );
        env_override(
            "NOTIFICATION_TIMEOUT_MS",
            &mut config.notification_timeout_ms,
            |v| (100..=60_000).contains(v),
            "must be between 100 and 60000",
        );
        env_override(
            "EXCHANGE_UTC_OFFSET_HOURS",
            &mut config.exchange_utc_offset_hours,
            |v| (-12..=14).contains(v),
            "must be between -12 and 14",
        );
        env_override(
            "POLL_INTERVAL_MINUTES",
            &mut config.poll_interval_minutes,
            |v| (1..=60).contains(v),
            "must be between 1 and 60",
        );
        env_override(
            "DEFAULT_STOPLOSS_PCT",
            &mut config.default_stoploss_pct,
            |v| *v > 0.0 && *v < 1.0,
            "must be between 0.0 and 1.0",
        );
        env_override(
            "DEFAULT_TAKE_PROFIT_PCT",
            &mut config.default_take_profit_pct,
            |v| *v > 0.0 && v.is_finite(),
            "must be positive",
        );
        env_override(
            "DEFAULT_VOLUME_MA_DAYS",
            &mut config.default_volume_ma_days,
            |v| (1..=250).contains(v),
            "must be between 1 and 250",
        );
        env_override(
            "VOLUME_SPIKE_Z",
            &mut config.volume_spike_z,
            |v| *v > 0.0 && v.is_finite(),
            "must be positive",
        );
        env_override(
            "VOLUME_DROP_Z",
            &mut config.volume_drop_z,
            |v| *v < 0.0 && v.is_finite(),
            "must be negative",
        );
        env_override(
            "RESET_CONFIRMATION_TTL_SECONDS",
            &mut config.reset_confirmation_ttl_seconds,
            |v| (10..=3600).contains(v),
            "must be between 10 and 3600",
        );
        env_override(
            "FIFO_CACHE_CAPACITY",
            &mut config.fifo_cache_capacity,
            |v| *v > 0,
            "must be positive",
        );

        config
    }

    pub fn exchange_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.exchange_utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    pub fn poll_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.poll_interval_minutes))
    }

    pub fn volume_thresholds(&self) -> VolumeThresholds {
        VolumeThresholds {
            spike_z: self.volume_spike_z,
            drop_z: self.volume_drop_z,
        }
    }

    pub fn market_data_timeout(&self) -> Duration {
        Duration::from_millis(self.market_data_timeout_ms)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn reset_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_confirmation_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.default_stoploss_pct, 0.08);
        assert_eq!(config.poll_interval_minutes, 5);
        assert_eq!(config.reset_confirmation_ttl_seconds, 120);
        assert_eq!(config.exchange_offset().local_minus_utc(), 7 * 3600);
        assert_eq!(config.poll_interval(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_env_override_rejects_out_of_range() {
        let mut value = 5u32;
        std::env::set_var("STOCK_TRACKER_TEST_POLL_A", "0");
        env_override("STOCK_TRACKER_TEST_POLL_A", &mut value, |v| *v > 0, "positive");
        assert_eq!(value, 5);

        std::env::set_var("STOCK_TRACKER_TEST_POLL_A", "not-a-number");
        env_override("STOCK_TRACKER_TEST_POLL_A", &mut value, |v| *v > 0, "positive");
        assert_eq!(value, 5);

        std::env::set_var("STOCK_TRACKER_TEST_POLL_A", " 15 ");
        env_override("STOCK_TRACKER_TEST_POLL_A", &mut value, |v| *v > 0, "positive");
        assert_eq!(value, 15);
    }

    #[test]
    fn test_missing_key_keeps_default() {
        let mut value = 0.08f64;
        env_override("STOCK_TRACKER_TEST_UNSET_B", &mut value, |_| true, "any");
        assert_eq!(value, 0.08);
    }
}
