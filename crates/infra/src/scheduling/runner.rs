//! Fire execution shared by every scheduled job
//!
//! A fire for a configuration that is already running is coalesced into the
//! running one. Fires queue for one of `max_workers` permits; a fire still
//! queued when its misfire grace expires is dropped.
//!
//! The per-fire timeout drops the executor future. `SyncService` closes its
//! run row as failed when dropped mid-pass, so the timeout here only bounds
//! how long a worker permit stays taken.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use calsync_core::sync::ports::SyncJobExecutor;
use calsync_domain::{SchedulerConfig, SyncCounts};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// What happened to one fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Completed(SyncCounts),
    Failed(String),
    /// Another run for the same configuration was in flight.
    Coalesced,
    /// No worker became free within the misfire grace period.
    Misfired,
    TimedOut,
}

impl FireOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Coalesced => "coalesced",
            Self::Misfired => "misfired",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for FireOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(counts) => write!(f, "completed ({counts})"),
            Self::Failed(message) => write!(f, "failed: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Bounded executor for scheduled sync fires
pub struct JobRunner {
    executor: Arc<dyn SyncJobExecutor>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    misfire_grace: Duration,
    job_timeout: Duration,
}

impl JobRunner {
    pub fn new(executor: Arc<dyn SyncJobExecutor>, config: &SchedulerConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            executor,
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            misfire_grace: Duration::from_secs(config.misfire_grace_seconds),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_running(&self, config_id: i64) -> bool {
        lock_set(&self.in_flight).contains(&config_id)
    }

    /// Run a fire that is due now.
    pub async fn fire(&self, config_id: i64) -> FireOutcome {
        self.fire_scheduled(config_id, Utc::now()).await
    }

    /// Run a fire that was due at `due_at`. Lateness counts against the
    /// misfire grace period.
    pub async fn fire_scheduled(&self, config_id: i64, due_at: DateTime<Utc>) -> FireOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, config_id) else {
            debug!(config_id, "run already in flight, coalescing fire");
            return FireOutcome::Coalesced;
        };

        let lateness = (Utc::now() - due_at).to_std().unwrap_or_default();
        let Some(remaining) = self.misfire_grace.checked_sub(lateness) else {
            warn!(config_id, late_secs = lateness.as_secs(), "fire past misfire grace, dropping");
            return FireOutcome::Misfired;
        };

        let permit =
            match tokio::time::timeout(remaining, Arc::clone(&self.workers).acquire_owned()).await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_closed)) => return FireOutcome::Misfired,
                Err(_elapsed) => {
                    warn!(config_id, "no worker free within misfire grace, dropping fire");
                    return FireOutcome::Misfired;
                }
            };

        let outcome =
            match tokio::time::timeout(self.job_timeout, self.executor.run_configuration(config_id))
                .await
            {
                Ok(Ok(counts)) => {
                    info!(
                        config_id,
                        created = counts.created,
                        updated = counts.updated,
                        deleted = counts.deleted,
                        "scheduled sync completed"
                    );
                    FireOutcome::Completed(counts)
                }
                Ok(Err(err)) => {
                    warn!(config_id, error = %err, "scheduled sync failed");
                    FireOutcome::Failed(err.to_string())
                }
                Err(_elapsed) => {
                    warn!(
                        config_id,
                        timeout_secs = self.job_timeout.as_secs(),
                        "scheduled sync timed out"
                    );
                    FireOutcome::TimedOut
                }
            };

        drop(permit);
        outcome
    }
}

/// Membership in the in-flight set for the lifetime of a fire
struct InFlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    config_id: i64,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<i64>>>, config_id: i64) -> Option<Self> {
        lock_set(set).insert(config_id).then(|| Self { set: Arc::clone(set), config_id })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.config_id);
    }
}

fn lock_set(set: &Mutex<HashSet<i64>>) -> std::sync::MutexGuard<'_, HashSet<i64>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
