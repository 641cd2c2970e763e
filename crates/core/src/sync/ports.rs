//! Port interfaces for sync operations

use std::sync::Arc;

use async_trait::async_trait;
use calsync_domain::{
    AccountSide, CalendarEvent, Credentials, EventMapping, Result, SyncConfiguration, SyncCounts,
    SyncRun, TimeWindow,
};
use chrono::{DateTime, Utc};

/// One page of a remote event listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    pub events: Vec<CalendarEvent>,
    pub next_page_token: Option<String>,
}

/// Result of updating a remote event
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(CalendarEvent),
    /// The event no longer exists remotely.
    Gone,
}

/// Result of deleting a remote event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The event was already absent; the desired end state holds.
    NotFound,
}

/// Read/write access to the events of calendars reachable with one set of
/// credentials
#[async_trait]
pub trait CalendarDataPort: Send + Sync {
    /// Fetch one page of events overlapping `window`, cancelled items
    /// included
    async fn list_events_page(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
        page_token: Option<&str>,
    ) -> Result<EventPage>;

    /// Insert an event; the returned event carries the remote id and
    /// last-modified timestamp
    async fn insert_event(&self, calendar_id: &str, event: &CalendarEvent)
        -> Result<CalendarEvent>;

    /// Replace the content of an existing event
    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<UpdateOutcome>;

    /// Delete an event
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<DeleteOutcome>;

    /// Fetch every event in `window`, following page tokens until exhausted
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<CalendarEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_events_page(calendar_id, window, page_token.as_deref()).await?;
            events.extend(page.events);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(events)
    }
}

/// Builds a calendar client bound to a set of credentials
pub trait CalendarConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn CalendarDataPort>>;
}

/// Supplies OAuth credentials; the engine never stores them
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Credentials for one account of a user, or `None` if the user has not
    /// connected it
    async fn get_credentials(&self, user_id: &str, side: AccountSide)
        -> Result<Option<Credentials>>;
}

/// Read access to sync configurations plus the `last_synced_at` write
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn get_configuration(&self, config_id: i64) -> Result<Option<SyncConfiguration>>;

    /// Active configurations with auto-sync enabled and a cron expression
    async fn list_schedulable(&self) -> Result<Vec<SyncConfiguration>>;

    async fn mark_synced(&self, config_id: i64, synced_at: DateTime<Utc>) -> Result<()>;
}

/// Persistent source-to-destination event correspondences
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn find_mapping(
        &self,
        config_id: i64,
        source_event_id: &str,
    ) -> Result<Option<EventMapping>>;

    /// Mapping of `config_id` whose destination copy is `dest_event_id`
    async fn find_by_dest_event(
        &self,
        config_id: i64,
        dest_event_id: &str,
    ) -> Result<Option<EventMapping>>;

    /// Insert or replace the row keyed by `(sync_config_id, source_event_id)`
    async fn upsert_mapping(&self, mapping: &EventMapping) -> Result<()>;

    /// Returns `true` if a row was removed
    async fn delete_mapping(&self, config_id: i64, source_event_id: &str) -> Result<bool>;

    async fn list_mappings(&self, config_id: i64) -> Result<Vec<EventMapping>>;
}

/// Invocation log of reconciliation runs
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    async fn record_run(&self, run: &SyncRun) -> Result<()>;

    /// Persist the terminal status, counts and error of a run
    async fn finish_run(&self, run: &SyncRun) -> Result<()>;

    /// Newest first
    async fn recent_runs(&self, config_id: i64, limit: usize) -> Result<Vec<SyncRun>>;
}

/// Runs the full sync pipeline for a configuration id; the scheduler's view
/// of the engine
#[async_trait]
pub trait SyncJobExecutor: Send + Sync {
    async fn run_configuration(&self, config_id: i64) -> Result<SyncCounts>;
}

/// Wall clock
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
