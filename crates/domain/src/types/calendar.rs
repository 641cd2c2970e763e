//! Calendar event payloads
//!
//! These types model an event as it travels through the engine: fetched from
//! a calendar, transformed into a candidate copy, and written to the other
//! calendar. They are never persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::impl_domain_status_conversions;

/// Remote status of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl_domain_status_conversions!(EventStatus {
    Confirmed => "confirmed",
    Tentative => "tentative",
    Cancelled => "cancelled",
});

/// Start or end of an event
///
/// Timed events carry `date_time`; all-day events carry `date`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn at(date_time: DateTime<Utc>) -> Self {
        Self { date_time: Some(date_time), ..Self::default() }
    }

    pub fn all_day(date: NaiveDate) -> Self {
        Self { date: Some(date), ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: i64,
}

/// Notification policy of an event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReminderPolicy {
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ReminderOverride>,
}

impl ReminderPolicy {
    /// No notifications at all.
    pub fn silent() -> Self {
        Self { use_default: false, overrides: Vec::new() }
    }
}

/// Typed view of the synchronization tags carried on a remote event.
///
/// Adapters translate this to and from whatever generic key-value store the
/// remote calendar offers. Keys outside the engine's reserved namespace are
/// kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub source_event_id: Option<String>,
    /// Loop-prevention sentinel: the event is a copy produced by the engine.
    pub created_by_sync: bool,
    pub sync_cluster_id: Option<Uuid>,
    pub dest_event_id: Option<String>,
    pub origin_calendar_id: Option<String>,
    pub config_id: Option<i64>,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub privacy_applied: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl SyncMetadata {
    pub fn is_synced_copy(&self) -> bool {
        self.created_by_sync
    }
}

/// A calendar event as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Remote-assigned identifier; absent on payloads not yet inserted.
    pub id: Option<String>,
    pub status: EventStatus,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub recurrence: Vec<String>,
    pub transparency: Option<String>,
    pub visibility: Option<String>,
    pub color_id: Option<String>,
    pub attendees: Vec<Attendee>,
    pub reminders: Option<ReminderPolicy>,
    /// Remote last-modified timestamp.
    pub updated: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub metadata: SyncMetadata,
}

impl CalendarEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// Identifier, if present and non-empty.
    pub fn event_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Half-open reconciliation window `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window from `now` to `now + days`, truncated to whole seconds.
    pub fn lookahead(now: DateTime<Utc>, days: u32) -> Self {
        let start = now.trunc_subsecs(0);
        Self { start, end: start + Duration::days(i64::from(days)) }
    }
}
