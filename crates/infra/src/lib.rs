//! # CalSync Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - Database implementations (SQLite via an r2d2 pool)
//! - The Google Calendar v3 calendar adapter
//! - The cron-driven sync scheduler
//! - Configuration loading and logging initialisation
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Contains all "impure" code (I/O, network, timers)

pub mod config;
pub mod database;
pub mod errors;
pub mod integrations;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use database::{
    DbManager, SqliteConfigurationRepository, SqliteMappingRepository, SqliteSyncRunRepository,
};
pub use errors::InfraError;
pub use integrations::calendar::{GoogleCalendarClient, GoogleCalendarConnector};
pub use observability::init_tracing;
pub use scheduling::{
    validate_cron_expression, validate_timezone, FireOutcome, JobRunner, SchedulerError,
    SyncScheduler,
};
