//! Scheduler error types

use calsync_domain::CalSyncError;
use thiserror::Error;

use super::cron::CronParseError;
use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Failed to create scheduler
    #[error("Failed to create scheduler: {0}")]
    CreationFailed(String),

    /// Failed to start scheduler
    #[error("Failed to start scheduler: {0}")]
    StartFailed(String),

    /// Failed to stop scheduler
    #[error("Failed to stop scheduler: {0}")]
    StopFailed(String),

    /// Cron expression rejected at registration time
    #[error("Invalid cron expression '{expression}': {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: CronParseError,
    },

    /// Unknown IANA timezone name
    #[error("Invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// Failed to register or remove a job
    #[error("Failed to register job: {0}")]
    JobRegistrationFailed(String),

    /// Configuration store could not be read
    #[error("Configuration store error: {0}")]
    Store(#[from] CalSyncError),

    /// Operation timed out
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        if let SchedulerError::Store(inner) = err {
            return InfraError(inner);
        }

        let domain_err = match err {
            SchedulerError::AlreadyRunning
            | SchedulerError::NotRunning
            | SchedulerError::InvalidCron { .. }
            | SchedulerError::InvalidTimezone(_) => CalSyncError::InvalidInput(err.to_string()),
            _ => CalSyncError::Internal(err.to_string()),
        };
        InfraError(domain_err)
    }
}

impl From<SchedulerError> for CalSyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
