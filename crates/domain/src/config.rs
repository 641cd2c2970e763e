//! Configuration management

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_LOOKAHEAD_DAYS, DEFAULT_MAX_WORKERS,
    DEFAULT_MISFIRE_GRACE_SECS, DEFAULT_PRIVACY_PLACEHOLDER, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
    pub google: GoogleConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "calsync.db".to_string(), pool_size: 8 }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on reconciliations running at the same time across all
    /// configurations.
    pub max_workers: usize,
    /// A fire that cannot start within this many seconds of its due time is
    /// dropped.
    pub misfire_grace_seconds: u64,
    pub job_timeout_seconds: u64,
    pub start_timeout_seconds: u64,
    pub stop_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            misfire_grace_seconds: DEFAULT_MISFIRE_GRACE_SECS,
            job_timeout_seconds: DEFAULT_JOB_TIMEOUT_SECS,
            start_timeout_seconds: 5,
            stop_timeout_seconds: 5,
        }
    }
}

/// Reconciliation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub default_lookahead_days: u32,
    pub request_timeout_seconds: u64,
    pub default_privacy_placeholder: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_lookahead_days: DEFAULT_LOOKAHEAD_DAYS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            default_privacy_placeholder: DEFAULT_PRIVACY_PLACEHOLDER.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `calsync_core=debug,info`.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

/// Google Calendar API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub base_url: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self { base_url: "https://www.googleapis.com/calendar/v3".to_string() }
    }
}
