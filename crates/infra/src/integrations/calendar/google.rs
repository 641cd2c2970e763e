//! Google Calendar v3 implementation of the calendar data port

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::sync::ports::{
    CalendarConnector, CalendarDataPort, DeleteOutcome, EventPage, UpdateOutcome,
};
use calsync_domain::{
    AppConfig, CalSyncError, CalendarEvent, Credentials, GoogleConfig, Result, TimeWindow,
};
use chrono::SecondsFormat;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use super::wire::{GoogleEvent, GoogleEventsResponse};
use crate::errors::conversions::status_error;
use crate::errors::InfraError;

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Calendar client bound to one account's access token
pub struct GoogleCalendarClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl GoogleCalendarClient {
    /// Build a client with its own HTTP connection pool.
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self::with_http(build_http_client(timeout)?, base_url, access_token))
    }

    pub(crate) fn with_http(
        http: Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url, access_token: access_token.into() }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.base_url, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }
}

#[async_trait]
impl CalendarDataPort for GoogleCalendarClient {
    async fn list_events_page(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
        page_token: Option<&str>,
    ) -> Result<EventPage> {
        let mut query = vec![
            ("timeMin", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("timeMax", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("singleEvents", "true".to_string()),
            ("showDeleted", "true".to_string()),
            ("maxResults", "250".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        debug!(calendar_id, has_page_token = page_token.is_some(), "listing events");

        let response = self
            .http
            .get(self.events_url(calendar_id))
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .map_err(InfraError::from)?;
        let response = ensure_success(response).await?;

        let listing: GoogleEventsResponse = response.json().await.map_err(InfraError::from)?;
        Ok(EventPage {
            events: listing.items.into_iter().map(CalendarEvent::from).collect(),
            next_page_token: listing.next_page_token,
        })
    }

    async fn insert_event(&self, calendar_id: &str, event: &CalendarEvent) -> Result<CalendarEvent> {
        let response = self
            .http
            .post(self.events_url(calendar_id))
            .bearer_auth(&self.access_token)
            .query(&[("sendUpdates", "none")])
            .json(&GoogleEvent::from(event))
            .send()
            .await
            .map_err(InfraError::from)?;
        let response = ensure_success(response).await?;

        let created: GoogleEvent = response.json().await.map_err(InfraError::from)?;
        Ok(created.into())
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<UpdateOutcome> {
        let response = self
            .http
            .put(self.event_url(calendar_id, event_id))
            .bearer_auth(&self.access_token)
            .query(&[("sendUpdates", "none")])
            .json(&GoogleEvent::from(event))
            .send()
            .await
            .map_err(InfraError::from)?;

        if is_gone(response.status()) {
            debug!(calendar_id, event_id, status = %response.status(), "update target is gone");
            return Ok(UpdateOutcome::Gone);
        }
        let response = ensure_success(response).await?;

        let updated: GoogleEvent = response.json().await.map_err(InfraError::from)?;
        Ok(UpdateOutcome::Updated(updated.into()))
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<DeleteOutcome> {
        let response = self
            .http
            .delete(self.event_url(calendar_id, event_id))
            .bearer_auth(&self.access_token)
            .query(&[("sendUpdates", "none")])
            .send()
            .await
            .map_err(InfraError::from)?;

        if is_gone(response.status()) {
            debug!(calendar_id, event_id, "delete target already absent");
            return Ok(DeleteOutcome::NotFound);
        }
        ensure_success(response).await?;
        Ok(DeleteOutcome::Deleted)
    }
}

/// Connects [`GoogleCalendarClient`]s that share one HTTP connection pool
#[derive(Clone)]
pub struct GoogleCalendarConnector {
    http: Client,
    base_url: String,
}

impl GoogleCalendarConnector {
    pub fn new(google: &GoogleConfig, request_timeout: Duration) -> Result<Self> {
        url::Url::parse(&google.base_url).map_err(|err| {
            CalSyncError::Config(format!("invalid Google API base URL {}: {err}", google.base_url))
        })?;

        Ok(Self { http: build_http_client(request_timeout)?, base_url: google.base_url.clone() })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.google, Duration::from_secs(config.sync.request_timeout_seconds))
    }
}

impl CalendarConnector for GoogleCalendarConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn CalendarDataPort>> {
        if credentials.access_token.trim().is_empty() {
            return Err(CalSyncError::Auth("access token is empty".into()));
        }

        Ok(Arc::new(GoogleCalendarClient::with_http(
            self.http.clone(),
            self.base_url.clone(),
            credentials.access_token.clone(),
        )))
    }
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| CalSyncError::Config(format!("failed to build HTTP client: {err}")))
}

fn is_gone(status: StatusCode) -> bool {
    matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
}

/// Turn a non-success response into a domain error carrying the body.
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(MAX_ERROR_BODY).collect();
    warn!(status = status.as_u16(), "Google Calendar API request failed");

    Err(status_error(status.as_u16(), detail.trim()))
}
