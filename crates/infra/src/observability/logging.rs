//! Tracing subscriber setup

use civicsync_domain::{CivicSyncError, LoggingConfig, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|err| {
            CivicSyncError::Config(format!("invalid log level {:?}: {err}", config.level))
        }),
    }
}

/// Install the global tracing subscriber.
///
/// Emits human readable lines, or one JSON object per event when
/// `config.json` is set. Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|err| CivicSyncError::Internal(format!("tracing already initialised: {err}")))
}
