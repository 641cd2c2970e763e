//! Sync orchestrator - one reconciliation pass for one configuration
//!
//! A pass fetches both calendars over the lookahead window, correlates
//! destination copies with source events through the copy metadata, and
//! brings every copy in line with its source. Mapping rows are written one
//! event at a time, immediately after the remote mutation they describe, so
//! a pass interrupted half-way leaves no row pointing at a copy that was
//! never created and the next pass resumes where this one stopped.

use std::collections::HashMap;
use std::sync::Arc;

use calsync_domain::{
    CalSyncError, CalendarEvent, Credentials, EventMapping, PrivacySettings, Result,
    SyncConfiguration, SyncCounts, SyncDirection, TimeWindow,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ports::{
    CalendarConnector, CalendarDataPort, Clock, DeleteOutcome, MappingStore, SystemClock,
    UpdateOutcome,
};
use super::transform::{build_payload, content_hash, differ, PayloadOptions, TrackingTags};

/// Inputs of one reconciliation pass
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub config_id: i64,
    pub source_credentials: Credentials,
    pub dest_credentials: Credentials,
    pub source_calendar_id: String,
    pub dest_calendar_id: String,
    pub lookahead_days: u32,
    pub privacy: PrivacySettings,
    pub direction: SyncDirection,
    pub paired_config_id: Option<i64>,
    pub destination_color_id: Option<String>,
}

impl SyncRequest {
    pub fn for_configuration(
        config: &SyncConfiguration,
        source_credentials: Credentials,
        dest_credentials: Credentials,
    ) -> Self {
        Self {
            config_id: config.id,
            source_credentials,
            dest_credentials,
            source_calendar_id: config.source_calendar_id.clone(),
            dest_calendar_id: config.dest_calendar_id.clone(),
            lookahead_days: config.lookahead_days,
            privacy: config.privacy.clone(),
            direction: config.direction,
            paired_config_id: config.paired_config_id,
            destination_color_id: config.destination_color_id.clone(),
        }
    }
}

/// What happened to a single source event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventAction {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Skipped,
}

struct PassContext<'a> {
    request: &'a SyncRequest,
    dest: &'a dyn CalendarDataPort,
    now: DateTime<Utc>,
}

/// Reconciles a source calendar into a destination calendar
pub struct SyncOrchestrator {
    connector: Arc<dyn CalendarConnector>,
    mappings: Arc<dyn MappingStore>,
    clock: Arc<dyn Clock>,
}

impl SyncOrchestrator {
    pub fn new(connector: Arc<dyn CalendarConnector>, mappings: Arc<dyn MappingStore>) -> Self {
        Self { connector, mappings, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Window a pass started now would cover.
    pub fn window_for(&self, lookahead_days: u32) -> TimeWindow {
        TimeWindow::lookahead(self.clock.now(), lookahead_days)
    }

    /// Run one reconciliation pass.
    ///
    /// Fails before any mutation if either calendar cannot be reached or
    /// listed. Transient remote failures during the event loop abort the
    /// pass; mutations already applied stay applied.
    #[instrument(skip_all, fields(config_id = request.config_id, direction = %request.direction))]
    pub async fn run_sync(&self, request: &SyncRequest) -> Result<SyncCounts> {
        let now = self.clock.now();
        let window = TimeWindow::lookahead(now, request.lookahead_days);

        let source = self.connector.connect(&request.source_credentials)?;
        let dest = self.connector.connect(&request.dest_credentials)?;

        let source_events = source.list_events(&request.source_calendar_id, &window).await?;
        let dest_events = dest.list_events(&request.dest_calendar_id, &window).await?;
        debug!(
            source_events = source_events.len(),
            dest_events = dest_events.len(),
            "Fetched both calendars"
        );

        let mut dest_index = index_destination(dest_events);
        let ctx = PassContext { request, dest: dest.as_ref(), now };
        let mut counts = SyncCounts::default();

        for event in &source_events {
            match self.reconcile_event(&ctx, event, &mut dest_index).await? {
                EventAction::Created => counts.created += 1,
                EventAction::Updated => counts.updated += 1,
                EventAction::Deleted => counts.deleted += 1,
                EventAction::Unchanged | EventAction::Skipped => {}
            }
        }

        info!(
            created = counts.created,
            updated = counts.updated,
            deleted = counts.deleted,
            "Reconciliation pass complete"
        );
        Ok(counts)
    }

    async fn reconcile_event(
        &self,
        ctx: &PassContext<'_>,
        event: &CalendarEvent,
        dest_index: &mut HashMap<String, CalendarEvent>,
    ) -> Result<EventAction> {
        let request = ctx.request;

        // Copies produced by the reverse direction are never sources.
        if event.metadata.is_synced_copy() {
            return Ok(EventAction::Skipped);
        }
        let Some(source_id) = event.event_id() else {
            debug!("Skipping source event without id");
            return Ok(EventAction::Skipped);
        };

        if event.is_cancelled() {
            return self.propagate_cancellation(ctx, source_id, dest_index).await;
        }

        let mapping = self.mappings.find_mapping(request.config_id, source_id).await?;

        if mapping.is_none() && self.is_paired_copy(request, source_id).await? {
            debug!(source_event_id = source_id, "Skipping copy owned by paired configuration");
            return Ok(EventAction::Skipped);
        }

        let dest_match = dest_index.get(source_id).cloned();

        let cluster_id = mapping
            .as_ref()
            .map(|m| m.sync_cluster_id)
            .or(event.metadata.sync_cluster_id)
            .or_else(|| dest_match.as_ref().and_then(|d| d.metadata.sync_cluster_id))
            .unwrap_or_else(Uuid::new_v4);
        let origin = mapping
            .as_ref()
            .map(|m| m.origin_calendar_id.clone())
            .or_else(|| event.metadata.origin_calendar_id.clone())
            .unwrap_or_else(|| request.source_calendar_id.clone());

        let opts = PayloadOptions {
            privacy: request.privacy.clone(),
            color_override: request.destination_color_id.clone(),
            tracking: Some(TrackingTags {
                cluster_id,
                dest_event_id: dest_match.as_ref().and_then(|d| d.id.clone()),
                origin_calendar_id: origin.clone(),
                config_id: request.config_id,
                synced_at: ctx.now,
            }),
        };
        let mut candidate = build_payload(event, &opts);
        let fingerprint = content_hash(&candidate);

        let Some(existing) = dest_match else {
            return self.create_copy(ctx, event, candidate, &origin, fingerprint, cluster_id).await;
        };
        let Some(existing_id) = existing.event_id().map(str::to_owned) else {
            return Ok(EventAction::Skipped);
        };

        if let Some(prior) = &mapping {
            if is_conflict(prior, event, &existing) && origin == request.dest_calendar_id {
                info!(
                    source_event_id = source_id,
                    origin = %origin,
                    "Both sides changed; destination is the origin and wins"
                );
                return Ok(EventAction::Skipped);
            }
        }

        // User-owned keys on the copy survive the rewrite.
        candidate.metadata.extra = existing.metadata.extra.clone();

        let unchanged = mapping.as_ref().is_some_and(|prior| {
            prior.content_hash == fingerprint
                && prior.dest_event_id == existing_id
                && existing.updated.is_some()
                && existing.updated == prior.dest_last_modified
        }) || !differ(&candidate, &existing);

        if unchanged {
            let refreshed = EventMapping {
                sync_config_id: request.config_id,
                source_event_id: source_id.to_string(),
                dest_event_id: existing_id,
                sync_cluster_id: cluster_id,
                source_last_modified: event.updated,
                dest_last_modified: existing.updated,
                content_hash: fingerprint,
                origin_calendar_id: origin,
                privacy_applied: request.privacy.enabled,
                last_synced_at: mapping.as_ref().map_or(ctx.now, |m| m.last_synced_at),
            };
            if mapping.as_ref() != Some(&refreshed) {
                if mapping.is_none() {
                    info!(source_event_id = source_id, "Adopting unmapped destination copy");
                }
                self.mappings.upsert_mapping(&refreshed).await?;
            }
            return Ok(EventAction::Unchanged);
        }

        match ctx.dest.update_event(&request.dest_calendar_id, &existing_id, &candidate).await {
            Ok(UpdateOutcome::Updated(written)) => {
                let row = EventMapping {
                    sync_config_id: request.config_id,
                    source_event_id: source_id.to_string(),
                    dest_event_id: written.id.clone().unwrap_or(existing_id),
                    sync_cluster_id: cluster_id,
                    source_last_modified: event.updated,
                    dest_last_modified: written.updated,
                    content_hash: fingerprint,
                    origin_calendar_id: origin,
                    privacy_applied: request.privacy.enabled,
                    last_synced_at: ctx.now,
                };
                self.mappings.upsert_mapping(&row).await?;
                dest_index.insert(source_id.to_string(), written);
                Ok(EventAction::Updated)
            }
            Ok(UpdateOutcome::Gone) => {
                info!(
                    source_event_id = source_id,
                    dest_event_id = %existing_id,
                    "Destination copy vanished; recreating"
                );
                dest_index.remove(source_id);
                self.mappings.delete_mapping(request.config_id, source_id).await?;
                candidate.metadata.dest_event_id = None;
                self.recreate_copy(ctx, event, candidate, &origin, fingerprint, cluster_id).await
            }
            Err(err) => skip_or_abort(err, source_id, "update"),
        }
    }

    async fn propagate_cancellation(
        &self,
        ctx: &PassContext<'_>,
        source_id: &str,
        dest_index: &mut HashMap<String, CalendarEvent>,
    ) -> Result<EventAction> {
        let request = ctx.request;
        let Some(copy) = dest_index.remove(source_id) else {
            // No live copy; a leftover row would only point at nothing.
            self.mappings.delete_mapping(request.config_id, source_id).await?;
            return Ok(EventAction::Unchanged);
        };
        let Some(copy_id) = copy.event_id() else {
            return Ok(EventAction::Skipped);
        };

        match ctx.dest.delete_event(&request.dest_calendar_id, copy_id).await? {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::NotFound => {
                debug!(source_event_id = source_id, "Destination copy already gone");
            }
        }
        self.mappings.delete_mapping(request.config_id, source_id).await?;
        Ok(EventAction::Deleted)
    }

    async fn create_copy(
        &self,
        ctx: &PassContext<'_>,
        event: &CalendarEvent,
        candidate: CalendarEvent,
        origin: &str,
        fingerprint: String,
        cluster_id: Uuid,
    ) -> Result<EventAction> {
        let source_id = event.event_id().unwrap_or_default();
        match self.insert_and_map(ctx, event, candidate, origin, fingerprint, cluster_id).await {
            Ok(action) => Ok(action),
            Err(err) => skip_or_abort(err, source_id, "insert"),
        }
    }

    /// Insert after a vanished copy; any failure skips only this event.
    async fn recreate_copy(
        &self,
        ctx: &PassContext<'_>,
        event: &CalendarEvent,
        candidate: CalendarEvent,
        origin: &str,
        fingerprint: String,
        cluster_id: Uuid,
    ) -> Result<EventAction> {
        match self.insert_and_map(ctx, event, candidate, origin, fingerprint, cluster_id).await {
            Ok(action) => Ok(action),
            Err(err) => {
                warn!(
                    source_event_id = event.event_id().unwrap_or_default(),
                    error = %err,
                    "Recreating destination copy failed; skipping event"
                );
                Ok(EventAction::Skipped)
            }
        }
    }

    async fn insert_and_map(
        &self,
        ctx: &PassContext<'_>,
        event: &CalendarEvent,
        candidate: CalendarEvent,
        origin: &str,
        fingerprint: String,
        cluster_id: Uuid,
    ) -> Result<EventAction> {
        let request = ctx.request;
        let source_id = event.event_id().unwrap_or_default();
        let written = ctx.dest.insert_event(&request.dest_calendar_id, &candidate).await?;
        let Some(dest_event_id) = written.id.clone() else {
            return Err(CalSyncError::Remote {
                status: 200,
                message: "inserted event has no id".to_string(),
            });
        };

        let row = EventMapping {
            sync_config_id: request.config_id,
            source_event_id: source_id.to_string(),
            dest_event_id,
            sync_cluster_id: cluster_id,
            source_last_modified: event.updated,
            dest_last_modified: written.updated,
            content_hash: fingerprint,
            origin_calendar_id: origin.to_string(),
            privacy_applied: request.privacy.enabled,
            last_synced_at: ctx.now,
        };
        self.mappings.upsert_mapping(&row).await?;
        debug!(source_event_id = source_id, dest_event_id = %row.dest_event_id, "Created copy");
        Ok(EventAction::Created)
    }

    /// Whether `source_id` is the destination copy of the paired
    /// configuration, i.e. an echo whose sentinel was lost.
    async fn is_paired_copy(&self, request: &SyncRequest, source_id: &str) -> Result<bool> {
        if !request.direction.is_bidirectional() {
            return Ok(false);
        }
        let Some(paired_id) = request.paired_config_id else {
            return Ok(false);
        };
        Ok(self.mappings.find_by_dest_event(paired_id, source_id).await?.is_some())
    }
}

/// Index live destination events by the source id in their metadata.
/// Cancelled copies are left out so they get recreated.
fn index_destination(events: Vec<CalendarEvent>) -> HashMap<String, CalendarEvent> {
    events
        .into_iter()
        .filter(|event| !event.is_cancelled())
        .filter_map(|event| {
            let key = event.metadata.source_event_id.clone().filter(|id| !id.is_empty())?;
            Some((key, event))
        })
        .collect()
}

/// Both sides modified since the mapping last recorded them.
fn is_conflict(prior: &EventMapping, source: &CalendarEvent, dest: &CalendarEvent) -> bool {
    is_newer(source.updated, prior.source_last_modified)
        && is_newer(dest.updated, prior.dest_last_modified)
}

fn is_newer(live: Option<DateTime<Utc>>, recorded: Option<DateTime<Utc>>) -> bool {
    matches!((live, recorded), (Some(live), Some(recorded)) if live > recorded)
}

/// Per-event write failures skip the event unless they indicate the whole
/// pass is doomed (connectivity, quota, auth, storage).
fn skip_or_abort(err: CalSyncError, source_id: &str, operation: &str) -> Result<EventAction> {
    if err.is_transient() || matches!(err, CalSyncError::Auth(_) | CalSyncError::Database(_)) {
        return Err(err);
    }
    warn!(source_event_id = source_id, operation, error = %err, "Skipping event after write failure");
    Ok(EventAction::Skipped)
}
