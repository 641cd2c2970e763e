//! Google Calendar v3 wire types
//!
//! Absent values are omitted from request bodies; the API rejects `null` for
//! several event fields.

use std::collections::BTreeMap;

use calsync_domain::{
    Attendee, CalendarEvent, EventStatus, EventTime, ReminderOverride, ReminderPolicy,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::metadata::{decode_shared, encode_shared};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEventsResponse {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<GoogleEventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<GoogleEventDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<GoogleAttendee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<GoogleReminders>,
    /// Server-managed.
    #[serde(default, skip_serializing)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<GoogleExtendedProperties>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleEventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleAttendee {
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleReminders {
    #[serde(default)]
    pub use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<GoogleReminderOverride>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GoogleReminderOverride {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct GoogleExtendedProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<BTreeMap<String, String>>,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<GoogleEvent> for CalendarEvent {
    fn from(raw: GoogleEvent) -> Self {
        let status = raw.status.as_deref().map_or(EventStatus::Confirmed, |value| {
            value.parse().unwrap_or_else(|_| {
                debug!(status = value, "unknown event status, treating as confirmed");
                EventStatus::Confirmed
            })
        });

        let shared =
            raw.extended_properties.and_then(|props| props.shared).unwrap_or_default();

        CalendarEvent {
            id: raw.id,
            status,
            summary: raw.summary,
            description: raw.description,
            location: raw.location,
            start: raw.start.map(EventTime::from),
            end: raw.end.map(EventTime::from),
            recurrence: raw.recurrence,
            transparency: raw.transparency,
            visibility: raw.visibility,
            color_id: raw.color_id,
            attendees: raw
                .attendees
                .into_iter()
                .map(|attendee| Attendee {
                    email: attendee.email,
                    display_name: attendee.display_name,
                    response_status: attendee.response_status,
                })
                .collect(),
            reminders: raw.reminders.map(|reminders| ReminderPolicy {
                use_default: reminders.use_default,
                overrides: reminders
                    .overrides
                    .into_iter()
                    .map(|o| ReminderOverride { method: o.method, minutes: o.minutes })
                    .collect(),
            }),
            updated: raw.updated,
            etag: raw.etag,
            metadata: decode_shared(shared),
        }
    }
}

impl From<&CalendarEvent> for GoogleEvent {
    fn from(event: &CalendarEvent) -> Self {
        let shared = encode_shared(&event.metadata);

        GoogleEvent {
            id: None,
            status: Some(event.status.to_string()),
            summary: event.summary.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: event.start.as_ref().map(GoogleEventDateTime::from),
            end: event.end.as_ref().map(GoogleEventDateTime::from),
            recurrence: event.recurrence.clone(),
            transparency: event.transparency.clone(),
            visibility: event.visibility.clone(),
            color_id: event.color_id.clone(),
            attendees: event
                .attendees
                .iter()
                .map(|attendee| GoogleAttendee {
                    email: attendee.email.clone(),
                    display_name: attendee.display_name.clone(),
                    response_status: attendee.response_status.clone(),
                })
                .collect(),
            reminders: event.reminders.as_ref().map(|policy| GoogleReminders {
                use_default: policy.use_default,
                overrides: policy
                    .overrides
                    .iter()
                    .map(|o| GoogleReminderOverride { method: o.method.clone(), minutes: o.minutes })
                    .collect(),
            }),
            updated: None,
            etag: None,
            extended_properties: (!shared.is_empty())
                .then(|| GoogleExtendedProperties { private: None, shared: Some(shared) }),
        }
    }
}

impl From<GoogleEventDateTime> for EventTime {
    fn from(raw: GoogleEventDateTime) -> Self {
        EventTime { date_time: raw.date_time, date: raw.date, time_zone: raw.time_zone }
    }
}

impl From<&EventTime> for GoogleEventDateTime {
    fn from(time: &EventTime) -> Self {
        GoogleEventDateTime {
            date_time: time.date_time,
            date: time.date,
            time_zone: time.time_zone.clone(),
        }
    }
}
