//! Macro for implementing Display and FromStr for status enums
//!
//! Queue statuses, entity types and error kinds are persisted as lowercase
//! strings (SQLite columns, JSON fields). This macro keeps the string form in
//! one place for both directions.
//!
//! # Example
//!
//! ```rust
//! use civicsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum UploadState {
//!     Queued,
//!     Uploaded,
//! }
//!
//! impl_domain_status_conversions!(UploadState {
//!     Queued => "queued",
//!     Uploaded => "uploaded",
//! });
//!
//! assert_eq!(UploadState::Queued.to_string(), "queued");
//! assert_eq!("UPLOADED".parse::<UploadState>(), Ok(UploadState::Uploaded));
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the mapped lowercase string
/// - FromStr parses case-insensitively and reports the enum name on failure
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
