//! Event transform
//!
//! Builds the candidate copy of a source event, decides whether an existing
//! copy needs rewriting, and fingerprints event content.
//!
//! The comparable field set is status, summary, description, location,
//! start, end, recurrence, transparency, visibility, colour and reminder
//! policy. Remote
//! bookkeeping (id, etag, last-modified, metadata) never participates in a
//! comparison.

use calsync_domain::{
    CalendarEvent, EventStatus, EventTime, PrivacySettings, ReminderPolicy, SyncMetadata,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Bidirectional tracking tags written onto a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTags {
    pub cluster_id: Uuid,
    pub dest_event_id: Option<String>,
    pub origin_calendar_id: String,
    pub config_id: i64,
    pub synced_at: DateTime<Utc>,
}

/// Options for [`build_payload`]
#[derive(Debug, Clone, Default)]
pub struct PayloadOptions {
    pub privacy: PrivacySettings,
    /// Replaces the source colour when set.
    pub color_override: Option<String>,
    pub tracking: Option<TrackingTags>,
}

/// Build the destination copy of `source`.
///
/// Start and end are always copied, privacy or not. Attendees are never
/// copied. Reminders are switched off on the copy.
pub fn build_payload(source: &CalendarEvent, opts: &PayloadOptions) -> CalendarEvent {
    let privacy = opts.privacy.enabled;

    let (summary, description, location) = if privacy {
        (Some(opts.privacy.placeholder_text.clone()), Some(String::new()), Some(String::new()))
    } else {
        (source.summary.clone(), source.description.clone(), source.location.clone())
    };

    let mut metadata = SyncMetadata {
        source_event_id: source.id.clone(),
        created_by_sync: true,
        privacy_applied: privacy,
        ..SyncMetadata::default()
    };
    if let Some(tags) = &opts.tracking {
        metadata.sync_cluster_id = Some(tags.cluster_id);
        metadata.dest_event_id = tags.dest_event_id.clone();
        metadata.origin_calendar_id = Some(tags.origin_calendar_id.clone());
        metadata.config_id = Some(tags.config_id);
        metadata.last_sync_timestamp = Some(tags.synced_at);
    }

    CalendarEvent {
        id: None,
        status: source.status,
        summary,
        description,
        location,
        start: source.start.clone(),
        end: source.end.clone(),
        recurrence: source.recurrence.clone(),
        transparency: source.transparency.clone(),
        visibility: source.visibility.clone(),
        color_id: opts.color_override.clone().or_else(|| source.color_id.clone()),
        attendees: Vec::new(),
        reminders: Some(ReminderPolicy::silent()),
        updated: None,
        etag: None,
        metadata,
    }
}

/// Whether `candidate` and `existing` differ on any comparable field.
///
/// Missing and empty text are the same value: remote calendars drop empty
/// strings on readback.
pub fn differ(candidate: &CalendarEvent, existing: &CalendarEvent) -> bool {
    candidate.status != existing.status
        || text(&candidate.summary) != text(&existing.summary)
        || text(&candidate.description) != text(&existing.description)
        || text(&candidate.location) != text(&existing.location)
        || candidate.start != existing.start
        || candidate.end != existing.end
        || candidate.recurrence != existing.recurrence
        || text(&candidate.transparency) != text(&existing.transparency)
        || text(&candidate.visibility) != text(&existing.visibility)
        || text(&candidate.color_id) != text(&existing.color_id)
        || candidate.reminders != existing.reminders
}

/// Hex SHA-256 over the comparable fields, reminder policy excluded.
///
/// Serialization goes through a fixed-order struct so the value is stable
/// across processes.
pub fn content_hash(event: &CalendarEvent) -> String {
    let fingerprint = Fingerprint {
        status: event.status,
        summary: text(&event.summary),
        description: text(&event.description),
        location: text(&event.location),
        start: event.start.as_ref(),
        end: event.end.as_ref(),
        recurrence: &event.recurrence,
        transparency: text(&event.transparency),
        visibility: text(&event.visibility),
        color_id: text(&event.color_id),
    };
    // Serializing borrowed strings and chrono values cannot fail.
    let encoded = serde_json::to_vec(&fingerprint).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    status: EventStatus,
    summary: &'a str,
    description: &'a str,
    location: &'a str,
    start: Option<&'a EventTime>,
    end: Option<&'a EventTime>,
    recurrence: &'a [String],
    transparency: &'a str,
    visibility: &'a str,
    color_id: &'a str,
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}
