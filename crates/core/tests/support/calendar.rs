use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::{CalendarConnector, CalendarDataPort, DeleteOutcome, EventPage, UpdateOutcome};
use calsync_domain::{
    CalSyncError, CalendarEvent, Credentials, EventStatus, EventTime, Result as DomainResult,
    TimeWindow,
};
use chrono::{DateTime, Duration, Utc};

use super::test_now;

#[derive(Default)]
struct State {
    calendars: HashMap<String, Vec<CalendarEvent>>,
    tick: i64,
    next_id: usize,
    gone_on_update: HashSet<String>,
    insert_failure: Option<CalSyncError>,
    list_delay: Option<std::time::Duration>,
}

impl State {
    fn next_modified(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        test_now() - Duration::days(1) + Duration::seconds(self.tick)
    }
}

/// In-memory stand-in for a remote calendar service.
///
/// Holds any number of calendars keyed by id. Deletion is soft: deleted
/// events stay listed with status `cancelled`, like the remote API with
/// deleted items shown. Every write bumps a monotonic last-modified clock.
#[derive(Clone)]
pub struct InMemoryCalendar {
    state: Arc<Mutex<State>>,
    page_size: usize,
    pub inserts: Arc<AtomicUsize>,
    pub updates: Arc<AtomicUsize>,
    pub deletes: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: 2,
            inserts: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
            deletes: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create or replace a user-authored event.
    pub fn put(&self, calendar_id: &str, mut event: CalendarEvent) -> CalendarEvent {
        let mut state = self.state.lock().unwrap();
        event.updated = Some(state.next_modified());
        let events = state.calendars.entry(calendar_id.to_string()).or_default();
        events.retain(|existing| existing.id != event.id);
        events.push(event.clone());
        event
    }

    /// Apply a user edit to an existing event.
    pub fn edit(&self, calendar_id: &str, event_id: &str, edit: impl FnOnce(&mut CalendarEvent)) {
        let mut state = self.state.lock().unwrap();
        let modified = state.next_modified();
        let event = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|events| events.iter_mut().find(|e| e.id.as_deref() == Some(event_id)))
            .expect("event to edit exists");
        edit(event);
        event.updated = Some(modified);
    }

    /// User deletes an event; it remains listed as cancelled.
    pub fn cancel(&self, calendar_id: &str, event_id: &str) {
        self.edit(calendar_id, event_id, |event| event.status = EventStatus::Cancelled);
    }

    /// Remove an event without leaving a tombstone.
    pub fn purge(&self, calendar_id: &str, event_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(events) = state.calendars.get_mut(calendar_id) {
            events.retain(|e| e.id.as_deref() != Some(event_id));
        }
    }

    /// Make the next update of `event_id` report the event as gone and drop
    /// it from storage.
    pub fn vanish_on_update(&self, event_id: &str) {
        self.state.lock().unwrap().gone_on_update.insert(event_id.to_string());
    }

    pub fn fail_inserts_with(&self, error: Option<CalSyncError>) {
        self.state.lock().unwrap().insert_failure = error;
    }

    /// Stall every listing call, simulating an unresponsive remote.
    pub fn delay_listings(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    pub fn events(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        self.state.lock().unwrap().calendars.get(calendar_id).cloned().unwrap_or_default()
    }

    /// Non-cancelled events.
    pub fn visible(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        self.events(calendar_id).into_iter().filter(|e| !e.is_cancelled()).collect()
    }

    pub fn find(&self, calendar_id: &str, event_id: &str) -> Option<CalendarEvent> {
        self.events(calendar_id).into_iter().find(|e| e.id.as_deref() == Some(event_id))
    }

    pub fn write_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

fn overlaps(event: &CalendarEvent, window: &TimeWindow) -> bool {
    let instant = |time: &Option<EventTime>| time.as_ref().and_then(|t| t.date_time);
    match (instant(&event.start), instant(&event.end)) {
        (Some(start), Some(end)) => end > window.start && start < window.end,
        _ => true,
    }
}

#[async_trait]
impl CalendarDataPort for InMemoryCalendar {
    async fn list_events_page(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
        page_token: Option<&str>,
    ) -> DomainResult<EventPage> {
        let delay = self.state.lock().unwrap().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let matching: Vec<CalendarEvent> =
            self.events(calendar_id).into_iter().filter(|e| overlaps(e, window)).collect();
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let events: Vec<CalendarEvent> =
            matching.iter().skip(offset).take(self.page_size).cloned().collect();
        let next = offset + events.len();
        let next_page_token = (next < matching.len()).then(|| next.to_string());
        Ok(EventPage { events, next_page_token })
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
    ) -> DomainResult<CalendarEvent> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.insert_failure.clone() {
            return Err(err);
        }
        self.inserts.fetch_add(1, Ordering::SeqCst);
        state.next_id += 1;
        let mut stored = event.clone();
        stored.id = Some(format!("{calendar_id}-evt-{}", state.next_id));
        stored.updated = Some(state.next_modified());
        stored.etag = Some(format!("\"{}\"", state.tick));
        state.calendars.entry(calendar_id.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> DomainResult<UpdateOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.gone_on_update.remove(event_id) {
            if let Some(events) = state.calendars.get_mut(calendar_id) {
                events.retain(|e| e.id.as_deref() != Some(event_id));
            }
            return Ok(UpdateOutcome::Gone);
        }
        let modified = state.next_modified();
        let Some(slot) = state.calendars.get_mut(calendar_id).and_then(|events| {
            events.iter_mut().find(|e| e.id.as_deref() == Some(event_id) && !e.is_cancelled())
        }) else {
            return Ok(UpdateOutcome::Gone);
        };
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut stored = event.clone();
        stored.id = Some(event_id.to_string());
        stored.updated = Some(modified);
        *slot = stored.clone();
        Ok(UpdateOutcome::Updated(stored))
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> DomainResult<DeleteOutcome> {
        let mut state = self.state.lock().unwrap();
        let modified = state.next_modified();
        let Some(slot) = state.calendars.get_mut(calendar_id).and_then(|events| {
            events.iter_mut().find(|e| e.id.as_deref() == Some(event_id) && !e.is_cancelled())
        }) else {
            return Ok(DeleteOutcome::NotFound);
        };
        self.deletes.fetch_add(1, Ordering::SeqCst);
        slot.status = EventStatus::Cancelled;
        slot.updated = Some(modified);
        Ok(DeleteOutcome::Deleted)
    }
}

impl CalendarConnector for InMemoryCalendar {
    fn connect(&self, _credentials: &Credentials) -> DomainResult<Arc<dyn CalendarDataPort>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

/// Timed event inside the test window.
pub fn timed_event(id: &str, summary: &str, start: DateTime<Utc>, minutes: i64) -> CalendarEvent {
    CalendarEvent {
        id: Some(id.to_string()),
        summary: Some(summary.to_string()),
        start: Some(EventTime::at(start)),
        end: Some(EventTime::at(start + Duration::minutes(minutes))),
        ..CalendarEvent::default()
    }
}
