//! Engine constants
//!
//! Centralized location for the defaults used by the queue, backoff engine,
//! connectivity monitor and conflict resolver.

// Backoff defaults
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const MAX_BACKOFF_EXPONENT: u32 = 30;
/// Ceiling for any scheduled retry, including server `Retry-After` hints
pub const MAX_RETRY_AFTER_SECS: u64 = 3_600;

// Submission
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 256;

// Connectivity debounce
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 500;

// Duplicate detection (reports only)
pub const DUPLICATE_SCORE_THRESHOLD: f64 = 0.8;
pub const DUPLICATE_RADIUS_METERS: f64 = 100.0;
pub const CATEGORY_WEIGHT: f64 = 0.3;
pub const PROXIMITY_WEIGHT: f64 = 0.4;
pub const TEXT_WEIGHT: f64 = 0.3;
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
