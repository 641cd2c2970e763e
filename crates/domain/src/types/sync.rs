//! Synchronization records: configurations, mappings, runs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_LOOKAHEAD_DAYS, DEFAULT_PRIVACY_PLACEHOLDER, DEFAULT_TIMEZONE, SCHEDULER_JOB_PREFIX,
};
use crate::impl_domain_status_conversions;
use crate::types::calendar::TimeWindow;

/// Direction tag of a sync configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    OneWay,
    BidirectionalForward,
    BidirectionalReverse,
}

impl_domain_status_conversions!(SyncDirection {
    OneWay => "one_way",
    BidirectionalForward => "bidirectional_forward",
    BidirectionalReverse => "bidirectional_reverse",
});

impl SyncDirection {
    pub fn is_bidirectional(self) -> bool {
        !matches!(self, Self::OneWay)
    }
}

/// Which account of a configuration credentials are requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSide {
    Source,
    Destination,
}

impl_domain_status_conversions!(AccountSide {
    Source => "source",
    Destination => "destination",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub enabled: bool,
    pub placeholder_text: String,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self { enabled: false, placeholder_text: DEFAULT_PRIVACY_PLACEHOLDER.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSyncSettings {
    pub enabled: bool,
    /// Standard 5-field crontab expression.
    pub cron_expression: Option<String>,
    /// IANA timezone name the cron expression is evaluated in.
    pub timezone: String,
}

impl Default for AutoSyncSettings {
    fn default() -> Self {
        Self { enabled: false, cron_expression: None, timezone: DEFAULT_TIMEZONE.to_string() }
    }
}

/// One directional pairing of a source and destination calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    pub id: i64,
    pub user_id: String,
    pub source_calendar_id: String,
    pub dest_calendar_id: String,
    pub lookahead_days: u32,
    pub direction: SyncDirection,
    /// Reverse configuration of a bidirectional pair.
    pub paired_config_id: Option<i64>,
    pub privacy: PrivacySettings,
    pub auto_sync: AutoSyncSettings,
    /// Colour forced onto every copy, overriding the source event's colour.
    pub destination_color_id: Option<String>,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncConfiguration {
    /// New active one-way configuration with default settings.
    pub fn new(
        user_id: impl Into<String>,
        source_calendar_id: impl Into<String>,
        dest_calendar_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id: user_id.into(),
            source_calendar_id: source_calendar_id.into(),
            dest_calendar_id: dest_calendar_id.into(),
            lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            direction: SyncDirection::OneWay,
            paired_config_id: None,
            privacy: PrivacySettings::default(),
            auto_sync: AutoSyncSettings::default(),
            destination_color_id: None,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scheduler job id for this configuration.
    pub fn job_id(&self) -> String {
        job_id_for(self.id)
    }

    /// Active, auto-sync enabled and carrying a non-blank cron expression.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.auto_sync.enabled && self.cron_expression().is_some()
    }

    pub fn cron_expression(&self) -> Option<&str> {
        self.auto_sync.cron_expression.as_deref().map(str::trim).filter(|expr| !expr.is_empty())
    }
}

/// Scheduler job id for a configuration id.
pub fn job_id_for(config_id: i64) -> String {
    format!("{SCHEDULER_JOB_PREFIX}{config_id}")
}

/// Correlation between a source event and its copy in the destination
/// calendar, unique per `(sync_config_id, source_event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMapping {
    pub sync_config_id: i64,
    pub source_event_id: String,
    pub dest_event_id: String,
    /// Shared by both directions of a bidirectional pair for the same
    /// logical event.
    pub sync_cluster_id: Uuid,
    pub source_last_modified: Option<DateTime<Utc>>,
    pub dest_last_modified: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub origin_calendar_id: String,
    pub privacy_applied: bool,
    pub last_synced_at: DateTime<Utc>,
}

/// Mutation counts of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCounts {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl SyncCounts {
    pub fn total(&self) -> u32 {
        self.created + self.updated + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for SyncCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "created={} updated={} deleted={}", self.created, self.updated, self.deleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Success,
    Failed,
}

impl_domain_status_conversions!(SyncRunStatus {
    Running => "running",
    Success => "success",
    Failed => "failed",
});

/// Invocation record of one reconciliation, manual or scheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub config_id: i64,
    pub status: SyncRunStatus,
    pub direction: SyncDirection,
    pub window: Option<TimeWindow>,
    pub counts: SyncCounts,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn running(
        config_id: i64,
        direction: SyncDirection,
        window: Option<TimeWindow>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            config_id,
            status: SyncRunStatus::Running,
            direction,
            window,
            counts: SyncCounts::default(),
            error_message: None,
            started_at,
            finished_at: None,
        }
    }

    pub fn succeed(&mut self, counts: SyncCounts, finished_at: DateTime<Utc>) {
        self.status = SyncRunStatus::Success;
        self.counts = counts;
        self.error_message = None;
        self.finished_at = Some(finished_at);
    }

    pub fn fail(&mut self, message: impl Into<String>, finished_at: DateTime<Utc>) {
        self.status = SyncRunStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(finished_at);
    }
}

/// OAuth credentials for one calendar account.
///
/// Owned by the credential provider; the engine only borrows them for the
/// duration of a run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub account_email: Option<String>,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            account_email: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("account_email", &self.account_email)
            .finish()
    }
}
