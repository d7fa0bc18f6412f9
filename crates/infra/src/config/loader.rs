//! Configuration loader
//!
//! Loads engine configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Whatever the source, the result is checked by [`validate`].
//!
//! ## Environment Variables
//! Required:
//! - `CIVICSYNC_DB_PATH`: Queue database file path
//! - `CIVICSYNC_API_BASE_URL`: Backend base URL
//!
//! Optional (defaults from [`Config::default`]):
//! - `CIVICSYNC_DB_POOL_SIZE`: Connection pool size
//! - `CIVICSYNC_API_TOKEN`: Bearer token for the backend
//! - `CIVICSYNC_API_TIMEOUT`: HTTP timeout in seconds
//! - `CIVICSYNC_SYNC_INTERVAL`: Periodic drain interval in seconds
//! - `CIVICSYNC_SYNC_ENABLED`: Whether the scheduler drains (true/false)
//! - `CIVICSYNC_SUBMIT_TIMEOUT`: Per-item submission timeout in seconds
//! - `CIVICSYNC_RETRY_BASE_DELAY_MS`, `CIVICSYNC_RETRY_MAX_DELAY_MS`,
//!   `CIVICSYNC_RETRY_MAX_ATTEMPTS`: Backoff policy
//! - `CIVICSYNC_QUIET_WINDOW_MS`: Connectivity debounce window
//! - `CIVICSYNC_LOG_LEVEL`, `CIVICSYNC_LOG_JSON`: Logging
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.{json,toml}` or `./civicsync.{json,toml}`
//! 2. `../config.{json,toml}` and `../../config.{json,toml}`
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use civicsync_domain::{
    CivicSyncError, Config, ConnectivityConfig, DatabaseConfig, GatewayConfig, LoggingConfig,
    Result, RetryConfig, SyncConfig,
};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["config.json", "config.toml", "civicsync.json", "civicsync.toml"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CivicSyncError::Config` if neither source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `CivicSyncError::Config` if a required variable is missing or a
/// value cannot be parsed.
pub fn load_from_env() -> Result<Config> {
    let defaults = Config::default();

    let config = Config {
        database: DatabaseConfig {
            path: env_var("CIVICSYNC_DB_PATH")?,
            pool_size: env_parse("CIVICSYNC_DB_POOL_SIZE", defaults.database.pool_size)?,
        },
        sync: SyncConfig {
            interval_seconds: env_parse("CIVICSYNC_SYNC_INTERVAL", defaults.sync.interval_seconds)?,
            enabled: env_bool("CIVICSYNC_SYNC_ENABLED", defaults.sync.enabled),
            submit_timeout_seconds: env_parse(
                "CIVICSYNC_SUBMIT_TIMEOUT",
                defaults.sync.submit_timeout_seconds,
            )?,
        },
        retry: RetryConfig {
            base_delay_ms: env_parse("CIVICSYNC_RETRY_BASE_DELAY_MS", defaults.retry.base_delay_ms)?,
            max_delay_ms: env_parse("CIVICSYNC_RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
            max_attempts: env_parse("CIVICSYNC_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
        },
        connectivity: ConnectivityConfig {
            quiet_window_ms: env_parse(
                "CIVICSYNC_QUIET_WINDOW_MS",
                defaults.connectivity.quiet_window_ms,
            )?,
        },
        gateway: GatewayConfig {
            base_url: env_var("CIVICSYNC_API_BASE_URL")?,
            timeout_seconds: env_parse("CIVICSYNC_API_TIMEOUT", defaults.gateway.timeout_seconds)?,
            api_token: std::env::var("CIVICSYNC_API_TOKEN").ok().filter(|t| !t.is_empty()),
        },
        logging: LoggingConfig {
            level: std::env::var("CIVICSYNC_LOG_LEVEL").unwrap_or(defaults.logging.level),
            json: env_bool("CIVICSYNC_LOG_JSON", defaults.logging.json),
        },
    };

    validate(&config)?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CivicSyncError::Config` if the file is missing, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CivicSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CivicSyncError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CivicSyncError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings the engine cannot run with
///
/// # Errors
/// Returns `CivicSyncError::Config` naming the first offending setting.
pub fn validate(config: &Config) -> Result<()> {
    let fail = |message: &str| Err(CivicSyncError::Config(message.to_string()));

    if config.database.path.trim().is_empty() {
        return fail("database.path must not be empty");
    }
    if config.database.pool_size == 0 {
        return fail("database.pool_size must be at least 1");
    }
    if config.gateway.base_url.trim().is_empty() {
        return fail("gateway.base_url must not be empty");
    }
    if config.retry.max_attempts == 0 {
        return fail("retry.max_attempts must be at least 1");
    }
    if config.retry.base_delay_ms == 0 {
        return fail("retry.base_delay_ms must be positive");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return fail("retry.max_delay_ms must not be below retry.base_delay_ms");
    }
    if config.sync.interval_seconds == 0 {
        return fail("sync.interval_seconds must be positive");
    }
    if config.sync.submit_timeout_seconds == 0 {
        return fail("sync.submit_timeout_seconds must be positive");
    }
    Ok(())
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CivicSyncError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CivicSyncError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(CivicSyncError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir);
    }

    roots
        .iter()
        .flat_map(|root| {
            let local = CONFIG_FILE_NAMES.iter().map(move |name| root.join(name));
            let parents = ["..", "../.."].into_iter().flat_map(move |up| {
                ["config.json", "config.toml"].into_iter().map(move |name| root.join(up).join(name))
            });
            local.chain(parents)
        })
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        CivicSyncError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional environment variable, using `default` when unset
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| CivicSyncError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
