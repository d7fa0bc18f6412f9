//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_QUIET_WINDOW_MS,
    DEFAULT_SUBMIT_TIMEOUT_SECS, DEFAULT_SYNC_INTERVAL_SECS,
};

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub connectivity: ConnectivityConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

/// Queue database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "civicsync-queue.db".to_string(), pool_size: 4 }
    }
}

/// Drain scheduling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic drain interval while online
    pub interval_seconds: u64,
    pub enabled: bool,
    /// Upper bound for a single submission
    pub submit_timeout_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_SYNC_INTERVAL_SECS,
            enabled: true,
            submit_timeout_seconds: DEFAULT_SUBMIT_TIMEOUT_SECS,
        }
    }
}

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Connectivity monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Quiet period a raw reading must survive before it is settled
    pub quiet_window_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self { quiet_window_ms: DEFAULT_QUIET_WINDOW_MS }
    }
}

/// Remote API gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            timeout_seconds: DEFAULT_SUBMIT_TIMEOUT_SECS,
            api_token: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
