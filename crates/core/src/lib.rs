//! # CalSync Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for calendars, credentials and storage
//! - The event transform used to build and compare synced copies
//! - The sync orchestrator (one reconciliation pass per configuration)
//! - The sync service wrapping a pass with credential lookup and run
//!   bookkeeping
//!
//! ## Architecture Principles
//! - Only depends on `calsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod sync;

pub use sync::orchestrator::{SyncOrchestrator, SyncRequest};
pub use sync::ports::{
    CalendarConnector, CalendarDataPort, Clock, ConfigurationStore, CredentialProvider,
    DeleteOutcome, EventPage, MappingStore, SyncJobExecutor, SyncRunRepository, SystemClock,
    UpdateOutcome,
};
pub use sync::service::SyncService;
pub use sync::transform::{build_payload, content_hash, differ, PayloadOptions, TrackingTags};
