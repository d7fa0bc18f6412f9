//! Conversions from external infrastructure errors into domain errors.

use civicsync_domain::CivicSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CivicSyncError);

impl From<InfraError> for CivicSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CivicSyncError> for InfraError {
    fn from(value: CivicSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoCivicSyncError {
    fn into_civicsync(self) -> CivicSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CivicSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCivicSyncError for SqlError {
    fn into_civicsync(self) -> CivicSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        CivicSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        CivicSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        CivicSyncError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::DiskFull, _) => {
                        CivicSyncError::Database("disk is full".into())
                    }
                    (ErrorCode::NotADatabase, _) => {
                        CivicSyncError::Database(format!("file is not a queue database: {message}"))
                    }
                    _ => CivicSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CivicSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CivicSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                CivicSyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::InvalidPath(path) => CivicSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => CivicSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_civicsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → CivicSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCivicSyncError for r2d2::Error {
    fn into_civicsync(self) -> CivicSyncError {
        CivicSyncError::Database(format!("connection pool error: {self}"))
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(value.into_civicsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CivicSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCivicSyncError for HttpError {
    fn into_civicsync(self) -> CivicSyncError {
        if self.is_timeout() {
            return CivicSyncError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CivicSyncError::Network("HTTP connection failure".into());
        }

        if self.is_builder() {
            return CivicSyncError::InvalidInput(format!("invalid HTTP request: {self}"));
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                404 => CivicSyncError::NotFound(message),
                400..=499 => CivicSyncError::InvalidInput(message),
                _ => CivicSyncError::Network(message),
            };
        }

        if self.is_decode() {
            return CivicSyncError::Serialization(format!("invalid response body: {self}"));
        }

        CivicSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_civicsync())
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error / serde_json::Error → CivicSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCivicSyncError for std::io::Error {
    fn into_civicsync(self) -> CivicSyncError {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::NotFound => CivicSyncError::NotFound(self.to_string()),
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                CivicSyncError::Serialization(self.to_string())
            }
            _ => CivicSyncError::Database(format!("storage I/O failure: {self}")),
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        InfraError(value.into_civicsync())
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(CivicSyncError::from(value))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
