//! Conversions from external infrastructure errors into domain errors.

use calsync_domain::CalSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CalSyncError);

impl From<InfraError> for CalSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CalSyncError> for InfraError {
    fn from(value: CalSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoCalSyncError {
    fn into_calsync(self) -> CalSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for SqlError {
    fn into_calsync(self) -> CalSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => CalSyncError::Database("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        CalSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        CalSyncError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        CalSyncError::Database("foreign key constraint violation".into())
                    }
                    _ => CalSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CalSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CalSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                CalSyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => CalSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => CalSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for r2d2::Error {
    fn into_calsync(self) -> CalSyncError {
        CalSyncError::Database(format!("connection pool error: {self}"))
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CalSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalSyncError for HttpError {
    fn into_calsync(self) -> CalSyncError {
        if self.is_timeout() {
            return CalSyncError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CalSyncError::Network("HTTP connection failure".into());
        }

        if self.is_decode() {
            return CalSyncError::Remote {
                status: self.status().map_or(0, |s| s.as_u16()),
                message: format!("malformed response body: {self}"),
            };
        }

        if let Some(status) = self.status() {
            return status_error(status.as_u16(), status.canonical_reason().unwrap_or("unknown"));
        }

        CalSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_calsync())
    }
}

/// Domain error for a non-success HTTP status.
///
/// 404/410 are not mapped here: callers that can tolerate a missing resource
/// handle them before reaching this point.
pub(crate) fn status_error(code: u16, detail: &str) -> CalSyncError {
    let message = format!("HTTP {code} {detail}");
    match code {
        401 | 403 => CalSyncError::Auth(message),
        404 | 410 => CalSyncError::NotFound(message),
        429 => CalSyncError::RateLimited(message),
        _ => CalSyncError::Remote { status: code, message },
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
