//! Domain types and models

pub mod calendar;
pub mod sync;

pub use calendar::{
    Attendee, CalendarEvent, EventStatus, EventTime, ReminderOverride, ReminderPolicy, SyncMetadata,
    TimeWindow,
};
pub use sync::{
    AccountSide, AutoSyncSettings, Credentials, EventMapping, PrivacySettings, SyncConfiguration,
    SyncCounts, SyncDirection, SyncRun, SyncRunStatus, job_id_for,
};
