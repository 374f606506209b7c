//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::{
    BusConfig, CircuitBreakerConfig, DEFAULT_CALLBACK_URL, HttpGatewayConfig, PlacementConfig,
    ReconciliationConfig, RetryPolicy, SagaConfig,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `PG_BASE_URL`: payment gateway URL; unset runs on the simulator
/// - `PG_CALLBACK_URL`, `PG_CONNECT_TIMEOUT_MS`, `PG_REQUEST_TIMEOUT_MS`
/// - `PG_RETRY_MAX_ATTEMPTS`, `PG_RETRY_BASE_DELAY_MS`
/// - `PG_BREAKER_FAILURE_RATE`, `PG_BREAKER_MIN_CALLS`, `PG_BREAKER_WINDOW`,
///   `PG_BREAKER_OPEN_MS`
/// - `RECONCILE_INTERVAL_SECS`, `RECONCILE_STALE_AFTER_SECS`
/// - `OUTBOX_POLL_MS`, `OUTBOX_MAX_ATTEMPTS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub pg_base_url: Option<String>,
    pub pg_callback_url: String,
    pub pg_connect_timeout: Duration,
    pub pg_request_timeout: Duration,
    pub pg_retry_max_attempts: u32,
    pub pg_retry_base_delay: Duration,
    pub breaker_failure_rate: f64,
    pub breaker_min_calls: usize,
    pub breaker_window: usize,
    pub breaker_open: Duration,
    pub reconcile_interval: Duration,
    pub reconcile_stale_after: Duration,
    pub outbox_poll: Duration,
    pub outbox_max_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lookup = &lookup;
        let millis = |key: &str, default: Duration| {
            parsed(lookup, key).map(Duration::from_millis).unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parsed(lookup, key).map(Duration::from_secs).unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed(lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            pg_base_url: non_empty("PG_BASE_URL"),
            pg_callback_url: lookup("PG_CALLBACK_URL").unwrap_or(defaults.pg_callback_url),
            pg_connect_timeout: millis("PG_CONNECT_TIMEOUT_MS", defaults.pg_connect_timeout),
            pg_request_timeout: millis("PG_REQUEST_TIMEOUT_MS", defaults.pg_request_timeout),
            pg_retry_max_attempts: parsed(lookup, "PG_RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.pg_retry_max_attempts),
            pg_retry_base_delay: millis("PG_RETRY_BASE_DELAY_MS", defaults.pg_retry_base_delay),
            breaker_failure_rate: parsed(lookup, "PG_BREAKER_FAILURE_RATE")
                .unwrap_or(defaults.breaker_failure_rate),
            breaker_min_calls: parsed(lookup, "PG_BREAKER_MIN_CALLS")
                .unwrap_or(defaults.breaker_min_calls),
            breaker_window: parsed(lookup, "PG_BREAKER_WINDOW").unwrap_or(defaults.breaker_window),
            breaker_open: millis("PG_BREAKER_OPEN_MS", defaults.breaker_open),
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            reconcile_stale_after: secs(
                "RECONCILE_STALE_AFTER_SECS",
                defaults.reconcile_stale_after,
            ),
            outbox_poll: millis("OUTBOX_POLL_MS", defaults.outbox_poll),
            outbox_max_attempts: parsed(lookup, "OUTBOX_MAX_ATTEMPTS")
                .unwrap_or(defaults.outbox_max_attempts),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry policy for PG calls.
    pub fn pg_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.pg_retry_max_attempts, self.pg_retry_base_delay)
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: self.breaker_failure_rate,
            minimum_calls: self.breaker_min_calls,
            window_size: self.breaker_window,
            open_duration: self.breaker_open,
        }
    }

    /// HTTP gateway settings, or `None` to use the simulator.
    pub fn gateway(&self) -> Option<HttpGatewayConfig> {
        self.pg_base_url.as_ref().map(|url| {
            HttpGatewayConfig::new(url.clone())
                .with_timeouts(self.pg_connect_timeout, self.pg_request_timeout)
        })
    }

    pub fn saga(&self) -> SagaConfig {
        SagaConfig {
            placement: PlacementConfig::default(),
            bus: BusConfig {
                poll_interval: self.outbox_poll,
                max_delivery_attempts: self.outbox_max_attempts,
                ..BusConfig::default()
            },
            reconciliation: ReconciliationConfig {
                interval: self.reconcile_interval,
                stale_after: self.reconcile_stale_after,
                ..ReconciliationConfig::default()
            },
            conflict_retry: RetryPolicy::default(),
            pg_retry: self.pg_retry(),
            callback_url: self.pg_callback_url.clone(),
        }
    }
}

/// Parses `key`, treating unparseable values as unset.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            pg_base_url: None,
            pg_callback_url: DEFAULT_CALLBACK_URL.to_string(),
            pg_connect_timeout: Duration::from_millis(1000),
            pg_request_timeout: Duration::from_millis(3000),
            pg_retry_max_attempts: 3,
            pg_retry_base_delay: Duration::from_millis(200),
            breaker_failure_rate: 0.5,
            breaker_min_calls: 5,
            breaker_window: 10,
            breaker_open: Duration::from_millis(10_000),
            reconcile_interval: Duration::from_secs(10),
            reconcile_stale_after: Duration::from_secs(300),
            outbox_poll: Duration::from_millis(200),
            outbox_max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert!(config.gateway().is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("PG_BASE_URL", "http://pg:8082"),
            ("PG_RETRY_MAX_ATTEMPTS", "5"),
            ("PG_BREAKER_OPEN_MS", "2500"),
            ("RECONCILE_STALE_AFTER_SECS", "60"),
            ("OUTBOX_MAX_ATTEMPTS", "9"),
        ]);

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.gateway().unwrap().base_url, "http://pg:8082");
        assert_eq!(config.pg_retry().max_attempts, 5);
        assert_eq!(config.breaker().open_duration, Duration::from_millis(2500));
        let saga = config.saga();
        assert_eq!(saga.reconciliation.stale_after, Duration::from_secs(60));
        assert_eq!(saga.bus.max_delivery_attempts, 9);
        assert_eq!(saga.pg_retry.max_attempts, 5);
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = from_pairs(&[("PORT", "not-a-port"), ("DATABASE_URL", "  ")]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }
}
