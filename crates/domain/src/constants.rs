//! Engine constants
//!
//! Centralized location for domain-level constants shared by the engine and
//! its adapters.

// Reserved metadata namespace. Every key the engine writes into a remote
// event's shared properties starts with this prefix; anything else belongs to
// the user and is carried through untouched.
pub const METADATA_KEY_PREFIX: &str = "calsync_";
pub const META_SOURCE_EVENT_ID: &str = "calsync_source_id";
pub const META_CREATED_BY_SYNC: &str = "calsync_created";
pub const META_SYNC_CLUSTER_ID: &str = "calsync_cluster_id";
pub const META_DEST_EVENT_ID: &str = "calsync_dest_id";
pub const META_ORIGIN_CALENDAR_ID: &str = "calsync_origin";
pub const META_CONFIG_ID: &str = "calsync_config_id";
pub const META_LAST_SYNC: &str = "calsync_synced_at";
pub const META_PRIVACY_APPLIED: &str = "calsync_private";

// Sync defaults
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 90;
pub const DEFAULT_PRIVACY_PLACEHOLDER: &str = "Personal appointment";
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Scheduler defaults
pub const SCHEDULER_JOB_PREFIX: &str = "sync_";
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 300;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 600;

// Sync run history
pub const RECENT_RUNS_LIMIT: usize = 50;
