// Protocol configuration — every tunable in one validated struct

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors for configuration validation
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Protocol configuration shared by both sides of the link.
///
/// The circuit-breaker threshold and cool-down defaults mirror the values
/// the terminal fleet currently runs with; they are fields rather than
/// constants so the domain owner can tune them without a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Consecutive errors before a peer's circuit breaker opens
    pub breaker_threshold: u32,
    /// Cool-down before an open breaker closes again (seconds)
    pub breaker_cooldown_secs: u64,
    /// Error-tracker entries older than this are swept (seconds)
    pub tracker_stale_secs: u64,
    /// Maximum accepted envelope age (seconds)
    pub envelope_max_age_secs: u64,
    /// Minimum acceptable signal strength during scan filtering (dBm)
    pub min_rssi_dbm: i8,
    /// Advertised name prefix, e.g. "VAULT" advertises as "VAULT-001"
    pub advertised_name_prefix: String,
    /// Maximum concurrent peers a peripheral accepts
    pub max_peers: usize,
    /// Transport-level connect timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Per characteristic read/write/notify timeout (milliseconds)
    pub operation_timeout_ms: u64,
    /// Sessions with no activity for this long are closed (seconds)
    pub idle_timeout_secs: u64,
    /// Period of the background maintenance scheduler (seconds)
    pub maintenance_interval_secs: u64,
    /// Bounded worker pool size for radio-facing operations
    pub worker_pool_size: usize,
    /// Validity window for freshly issued device certificates (seconds)
    pub certificate_validity_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            breaker_threshold: 3,
            breaker_cooldown_secs: 30,
            tracker_stale_secs: 300,
            envelope_max_age_secs: 30,
            min_rssi_dbm: -70,
            advertised_name_prefix: "VAULT".to_string(),
            max_peers: 4,
            connect_timeout_ms: 10_000,
            operation_timeout_ms: 5_000,
            idle_timeout_secs: 60,
            maintenance_interval_secs: 5,
            worker_pool_size: 4,
            certificate_validity_secs: 86_400,
        }
    }
}

impl ProtocolConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker_threshold must be >= 1".to_string(),
            ));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be >= 1".to_string()));
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be >= 1".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance_interval_secs must be > 0".to_string(),
            ));
        }
        if self.advertised_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "advertised_name_prefix cannot be empty".to_string(),
            ));
        }
        if !(-100..=0).contains(&(self.min_rssi_dbm as i16)) {
            return Err(ConfigError::Invalid(
                "min_rssi_dbm must be within -100..=0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}
