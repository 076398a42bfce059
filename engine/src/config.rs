//! Configuration management for the allocation engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::Duration as ChronoDuration;
use prizedraw_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`Config::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting holds a value the engine cannot work with.
    #[error("Invalid {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// Why the value is rejected
        reason: String,
    },
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub postgres: PostgresConfig,
    /// Allocation behavior
    pub allocation: AllocationConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

/// Allocation behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Upper bound on tickets per request when settings do not say otherwise
    pub max_quantity_per_request: u32,
    /// Settings cache time-to-live in seconds
    pub settings_cache_ttl_secs: u64,
    /// Lifetime of universal tickets minted by free-ticket prizes (0 = never expire)
    pub free_ticket_expiry_days: u32,
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing` filter directive
    pub log_filter: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            postgres: PostgresConfig::from_env(),
            allocation: AllocationConfig {
                max_quantity_per_request: env::var("ALLOCATION_MAX_QUANTITY_PER_REQUEST")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
                settings_cache_ttl_secs: env::var("SETTINGS_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
                free_ticket_expiry_days: env::var("INSTANT_WIN_FREE_TICKET_EXPIRY_DAYS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            },
            observability: ObservabilityConfig {
                log_filter: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "info,prizedraw_engine=debug,sqlx=warn".to_string()),
                metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                metrics_port: env::var("METRICS_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(9090),
            },
        }
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pg = &self.postgres;
        if pg.url.trim().is_empty() {
            return Err(invalid("DATABASE_URL", "must not be empty"));
        }
        if pg.max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be at least 1"));
        }
        if pg.min_connections > pg.max_connections {
            return Err(invalid(
                "DATABASE_MIN_CONNECTIONS",
                format!("{} exceeds max connections {}", pg.min_connections, pg.max_connections),
            ));
        }
        if pg.lock_timeout_ms == 0 {
            return Err(invalid("DATABASE_LOCK_TIMEOUT_MS", "must be positive"));
        }
        if self.allocation.max_quantity_per_request == 0 {
            return Err(invalid("ALLOCATION_MAX_QUANTITY_PER_REQUEST", "must be at least 1"));
        }
        Ok(())
    }
}

impl AllocationConfig {
    /// Settings cache time-to-live.
    #[must_use]
    pub const fn settings_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.settings_cache_ttl_secs)
    }

    /// Expiry applied to minted free tickets, if any.
    #[must_use]
    pub fn free_ticket_expiry(&self) -> Option<ChronoDuration> {
        (self.free_ticket_expiry_days > 0).then(|| ChronoDuration::days(i64::from(self.free_ticket_expiry_days)))
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_quantity_per_request: 100,
            settings_cache_ttl_secs: 60,
            free_ticket_expiry_days: 90,
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            postgres: PostgresConfig::default(),
            allocation: AllocationConfig::default(),
            observability: ObservabilityConfig {
                log_filter: "info".to_string(),
                metrics_host: "127.0.0.1".to_string(),
                metrics_port: 9090,
            },
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn min_connections_above_max_is_rejected() {
        let mut config = config();
        config.postgres.min_connections = config.postgres.max_connections + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "DATABASE_MIN_CONNECTIONS", .. })
        ));
    }

    #[test]
    fn zero_quantity_bound_is_rejected() {
        let mut config = config();
        config.allocation.max_quantity_per_request = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_expiry_days_means_no_expiry() {
        let allocation = AllocationConfig {
            free_ticket_expiry_days: 0,
            ..AllocationConfig::default()
        };
        assert_eq!(allocation.free_ticket_expiry(), None);
        assert_eq!(
            AllocationConfig::default().free_ticket_expiry(),
            Some(ChronoDuration::days(90))
        );
    }
}
