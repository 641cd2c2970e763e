//! Scheduling infrastructure for automatic sync runs
//!
//! - [`cron`]: five-field crontab parsing and evaluation
//! - [`runner`]: the bounded, coalescing executor behind every fire
//! - [`sync_scheduler`]: the per-configuration job table on top of
//!   `tokio-cron-scheduler`
//!
//! The scheduler has an explicit lifecycle (`start`, `load_all_from_store`,
//! `shutdown`), a cancellation token for in-flight catch-up work and timeouts
//! around engine start and stop.

pub mod cron;
pub mod error;
pub mod runner;
pub mod sync_scheduler;

use chrono_tz::Tz;
use tracing::warn;

pub use cron::{CronExpression, CronParseError};
pub use error::{SchedulerError, SchedulerResult};
pub use runner::{FireOutcome, JobRunner};
pub use sync_scheduler::{LoadReport, ScheduledJob, SyncScheduler};

/// Validate a five-field crontab expression.
pub fn validate_cron_expression(expression: &str) -> SchedulerResult<CronExpression> {
    CronExpression::parse(expression).map_err(|source| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        source,
    })
}

/// Validate an IANA timezone name.
pub fn validate_timezone(name: &str) -> SchedulerResult<Tz> {
    name.trim().parse::<Tz>().map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// Resolve a timezone for job registration, falling back to UTC.
pub(crate) fn resolve_timezone(name: &str) -> Tz {
    validate_timezone(name).unwrap_or_else(|err| {
        warn!(timezone = name, error = %err, "unknown timezone, scheduling in UTC");
        Tz::UTC
    })
}
