//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `CALSYNC_DB_PATH` is not set, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `CALSYNC_DB_PATH`: Database file path (required for env loading)
//! - `CALSYNC_DB_POOL_SIZE`: Connection pool size
//! - `CALSYNC_SCHEDULER_MAX_WORKERS`: Concurrent reconciliations
//! - `CALSYNC_SCHEDULER_MISFIRE_GRACE`: Misfire grace period in seconds
//! - `CALSYNC_SCHEDULER_JOB_TIMEOUT`: Per-run timeout in seconds
//! - `CALSYNC_SYNC_LOOKAHEAD_DAYS`: Default lookahead window
//! - `CALSYNC_SYNC_REQUEST_TIMEOUT`: Remote request timeout in seconds
//! - `CALSYNC_SYNC_PLACEHOLDER`: Default privacy placeholder text
//! - `CALSYNC_LOG_FILTER`: Log filter directive
//! - `CALSYNC_LOG_JSON`: Emit JSON logs (true/false)
//! - `CALSYNC_GOOGLE_BASE_URL`: Google Calendar API base URL
//!
//! Unset optional variables keep their defaults.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.json` or `./config.toml` (current working directory)
//! 2. `./calsync.json` or `./calsync.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{AppConfig, CalSyncError, Result};

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CalSyncError::Config` if configuration cannot be loaded from
/// either source or a value is malformed.
pub fn load() -> Result<AppConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns `CalSyncError::Config` if `CALSYNC_DB_PATH` is missing or any
/// set variable has an invalid value.
pub fn load_from_env() -> Result<AppConfig> {
    let mut config = AppConfig::default();

    config.database.path = env_var("CALSYNC_DB_PATH")?;
    if let Some(size) = env_parse("CALSYNC_DB_POOL_SIZE", "pool size")? {
        config.database.pool_size = size;
    }

    if let Some(workers) = env_parse("CALSYNC_SCHEDULER_MAX_WORKERS", "max workers")? {
        config.scheduler.max_workers = workers;
    }
    if let Some(grace) = env_parse("CALSYNC_SCHEDULER_MISFIRE_GRACE", "misfire grace")? {
        config.scheduler.misfire_grace_seconds = grace;
    }
    if let Some(timeout) = env_parse("CALSYNC_SCHEDULER_JOB_TIMEOUT", "job timeout")? {
        config.scheduler.job_timeout_seconds = timeout;
    }

    if let Some(days) = env_parse("CALSYNC_SYNC_LOOKAHEAD_DAYS", "lookahead days")? {
        config.sync.default_lookahead_days = days;
    }
    if let Some(timeout) = env_parse("CALSYNC_SYNC_REQUEST_TIMEOUT", "request timeout")? {
        config.sync.request_timeout_seconds = timeout;
    }
    if let Ok(placeholder) = std::env::var("CALSYNC_SYNC_PLACEHOLDER") {
        config.sync.default_privacy_placeholder = placeholder;
    }

    if let Ok(filter) = std::env::var("CALSYNC_LOG_FILTER") {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool("CALSYNC_LOG_JSON", config.logging.json);

    if let Ok(base_url) = std::env::var("CALSYNC_GOOGLE_BASE_URL") {
        url::Url::parse(&base_url)
            .map_err(|e| CalSyncError::Config(format!("Invalid Google base URL: {}", e)))?;
        config.google.base_url = base_url;
    }

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CalSyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CalSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CalSyncError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CalSyncError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<AppConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(CalSyncError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidate_files(&cwd));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidate_files(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidate_files(dir: &Path) -> Vec<PathBuf> {
    vec![
        dir.join("config.json"),
        dir.join("config.toml"),
        dir.join("calsync.json"),
        dir.join("calsync.toml"),
        dir.join("../config.json"),
        dir.join("../config.toml"),
    ]
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        CalSyncError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional environment variable; unset yields `None`
fn env_parse<T>(key: &str, what: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CalSyncError::Config(format!("Invalid {}: {}", what, e))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
