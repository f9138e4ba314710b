//! Application configuration loaded from environment variables.

use std::time::Duration;

use outbox::RelayConfig;

/// Server and background-worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (default: in-memory store)
/// - `ORDER_CREATED_TOPIC` — topic order events are published on
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`,
///   `OUTBOX_BACKOFF_STEP_SECS`, `OUTBOX_BACKOFF_CAP_SECS`,
///   `PUBLISH_TIMEOUT_SECS` — relay tuning
/// - `ARCHIVE_RETENTION_DAYS`, `ARCHIVE_CHUNK_SIZE`,
///   `ARCHIVE_INTERVAL_SECS` — archive sweeper tuning
/// - `PRODUCT_CACHE_TTL_SECS` — catalog read cache lifetime
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub order_created_topic: String,
    pub outbox_poll_interval_ms: u64,
    pub outbox_batch_size: usize,
    pub outbox_backoff_step_secs: i64,
    pub outbox_backoff_cap_secs: i64,
    pub publish_timeout_secs: u64,
    pub archive_retention_days: i64,
    pub archive_chunk_size: usize,
    pub archive_interval_secs: u64,
    pub product_cache_ttl_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            order_created_topic: std::env::var("ORDER_CREATED_TOPIC")
                .unwrap_or_else(|_| "order.created".to_string()),
            outbox_poll_interval_ms: env_parse("OUTBOX_POLL_INTERVAL_MS", 5000),
            outbox_batch_size: env_parse("OUTBOX_BATCH_SIZE", 100),
            outbox_backoff_step_secs: env_parse("OUTBOX_BACKOFF_STEP_SECS", 5),
            outbox_backoff_cap_secs: env_parse("OUTBOX_BACKOFF_CAP_SECS", 60),
            publish_timeout_secs: env_parse("PUBLISH_TIMEOUT_SECS", 5),
            archive_retention_days: env_parse("ARCHIVE_RETENTION_DAYS", 30),
            archive_chunk_size: env_parse("ARCHIVE_CHUNK_SIZE", 100),
            archive_interval_secs: env_parse("ARCHIVE_INTERVAL_SECS", 86_400),
            product_cache_ttl_secs: env_parse("PRODUCT_CACHE_TTL_SECS", 60),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the relay configuration from the outbox knobs.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            topic: self.order_created_topic.clone(),
            batch_size: self.outbox_batch_size,
            poll_interval: Duration::from_millis(self.outbox_poll_interval_ms),
            backoff_step: chrono::Duration::seconds(self.outbox_backoff_step_secs),
            backoff_cap: chrono::Duration::seconds(self.outbox_backoff_cap_secs),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            order_created_topic: "order.created".to_string(),
            outbox_poll_interval_ms: 5000,
            outbox_batch_size: 100,
            outbox_backoff_step_secs: 5,
            outbox_backoff_cap_secs: 60,
            publish_timeout_secs: 5,
            archive_retention_days: 30,
            archive_chunk_size: 100,
            archive_interval_secs: 86_400,
            product_cache_ttl_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.outbox_batch_size, 100);
        assert_eq!(config.archive_retention_days, 30);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn relay_config_mirrors_knobs() {
        let config = Config::default();
        let relay = config.relay_config();
        assert_eq!(relay.topic, "order.created");
        assert_eq!(relay.batch_size, 100);
        assert_eq!(relay.poll_interval, Duration::from_secs(5));
        assert_eq!(relay.backoff_step, chrono::Duration::seconds(5));
        assert_eq!(relay.backoff_cap, chrono::Duration::seconds(60));
        assert_eq!(relay.publish_timeout, Duration::from_secs(5));
    }

    #[test]
    fn addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
