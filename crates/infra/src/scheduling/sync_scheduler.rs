//! Cron-driven scheduler for per-configuration sync jobs.
//!
//! Each schedulable [`SyncConfiguration`] owns one job (`sync_{config_id}`)
//! registered with a `tokio-cron-scheduler` engine in the configuration's
//! timezone. Fires are executed by a shared [`JobRunner`], which enforces one
//! in-flight run per configuration, the worker pool bound and the misfire
//! grace period.
//!
//! The job table lives in process memory only. [`SyncScheduler::load_all_from_store`]
//! rebuilds it at startup and dispatches at most one catch-up run for a
//! configuration whose fire was missed within the grace period.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use calsync_domain::SchedulerConfig;
//! use calsync_infra::scheduling::{SchedulerResult, SyncScheduler};
//!
//! # async fn example(
//! #     executor: Arc<dyn calsync_core::SyncJobExecutor>,
//! #     store: Arc<dyn calsync_core::ConfigurationStore>,
//! # ) -> SchedulerResult<()> {
//! let mut scheduler = SyncScheduler::new(SchedulerConfig::default(), executor, store);
//! scheduler.start().await?;
//! let report = scheduler.load_all_from_store().await?;
//! tracing::info!(registered = report.registered, "jobs restored");
//! // ... application runs ...
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use calsync_core::sync::ports::{ConfigurationStore, SyncJobExecutor};
use calsync_domain::{job_id_for, SchedulerConfig, SyncConfiguration};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::cron::CronExpression;
use super::error::{SchedulerError, SchedulerResult};
use super::runner::{FireOutcome, JobRunner};
use super::{resolve_timezone, validate_cron_expression};
use crate::observability::job_span;

/// A registered sync job
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub job_id: String,
    pub config_id: i64,
    pub user_id: String,
    pub cron: CronExpression,
    /// Resolved timezone; UTC when the configured name was unknown.
    pub timezone: Tz,
    engine_id: Uuid,
}

/// Summary of a [`SyncScheduler::load_all_from_store`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub registered: usize,
    /// Configurations whose stored cron expression was rejected
    pub skipped: usize,
    /// Catch-up runs dispatched for missed fires
    pub catch_up: usize,
}

pub struct SyncScheduler {
    config: SchedulerConfig,
    runner: Arc<JobRunner>,
    store: Arc<dyn ConfigurationStore>,
    scheduler: Option<JobScheduler>,
    jobs: Mutex<HashMap<i64, ScheduledJob>>,
    catch_up_handles: Mutex<Vec<JoinHandle<FireOutcome>>>,
    cancellation: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn SyncJobExecutor>,
        store: Arc<dyn ConfigurationStore>,
    ) -> Self {
        let runner = Arc::new(JobRunner::new(executor, &config));
        Self {
            config,
            runner,
            store,
            scheduler: None,
            jobs: Mutex::new(HashMap::new()),
            catch_up_handles: Mutex::new(Vec::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Start the underlying job engine.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let engine = JobScheduler::new()
            .await
            .map_err(|err| SchedulerError::CreationFailed(format!("{err:?}")))?;

        let start_timeout = self.config.start_timeout_seconds;
        tokio::time::timeout(Duration::from_secs(start_timeout), engine.start())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: start_timeout })?
            .map_err(|err| SchedulerError::StartFailed(format!("{err:?}")))?;

        self.scheduler = Some(engine);
        info!(max_workers = self.runner.max_workers(), "Sync scheduler started");
        Ok(())
    }

    /// Stop the engine and forget every registered job. Runs already in
    /// progress finish on their own; queued catch-up runs are cancelled.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        let Some(mut engine) = self.scheduler.take() else {
            return Err(SchedulerError::NotRunning);
        };

        info!("Stopping sync scheduler");
        self.cancellation.cancel();
        self.jobs.lock().await.clear();

        let stop_timeout = self.config.stop_timeout_seconds;
        tokio::time::timeout(Duration::from_secs(stop_timeout), engine.shutdown())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: stop_timeout })?
            .map_err(|err| SchedulerError::StopFailed(format!("{err:?}")))?;

        info!("Sync scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Register the job for `config_id`, replacing any existing one.
    ///
    /// The cron expression must be valid. An unknown timezone name falls
    /// back to UTC with a warning.
    #[instrument(skip(self), fields(job_id = %job_id_for(config_id)))]
    pub async fn add_job(
        &self,
        config_id: i64,
        user_id: &str,
        cron_expression: &str,
        timezone: &str,
    ) -> SchedulerResult<ScheduledJob> {
        let engine = self.scheduler.as_ref().ok_or(SchedulerError::NotRunning)?;
        let cron = validate_cron_expression(cron_expression)?;
        let tz = resolve_timezone(timezone);

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&config_id) {
            engine.remove(&previous.engine_id).await.map_err(|err| {
                SchedulerError::JobRegistrationFailed(format!(
                    "failed to replace {}: {err:?}",
                    previous.job_id
                ))
            })?;
            debug!(cron = %previous.cron, "replacing existing job");
        }

        let job = self.build_job(config_id, &cron, tz)?;
        let engine_id = engine
            .add(job)
            .await
            .map_err(|err| SchedulerError::JobRegistrationFailed(format!("{err:?}")))?;

        let scheduled = ScheduledJob {
            job_id: job_id_for(config_id),
            config_id,
            user_id: user_id.to_string(),
            cron,
            timezone: tz,
            engine_id,
        };
        jobs.insert(config_id, scheduled.clone());

        info!(user_id, cron = %scheduled.cron, timezone = %tz, "Sync job scheduled");
        Ok(scheduled)
    }

    /// Unregister the job for `config_id`. Returns `false` when there was
    /// none.
    #[instrument(skip(self), fields(job_id = %job_id_for(config_id)))]
    pub async fn remove_job(&self, config_id: i64) -> SchedulerResult<bool> {
        let Some(engine) = self.scheduler.as_ref() else {
            return Ok(false);
        };

        let Some(job) = self.jobs.lock().await.remove(&config_id) else {
            debug!("no job registered");
            return Ok(false);
        };

        engine
            .remove(&job.engine_id)
            .await
            .map_err(|err| SchedulerError::JobRegistrationFailed(format!("{err:?}")))?;
        info!("Sync job removed");
        Ok(true)
    }

    /// Re-register every schedulable configuration and dispatch catch-up
    /// runs for fires missed within the grace period.
    ///
    /// A configuration with an invalid cron expression is skipped with a
    /// warning; it does not fail the whole load.
    #[instrument(skip(self))]
    pub async fn load_all_from_store(&self) -> SchedulerResult<LoadReport> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let configurations = self.store.list_schedulable().await?;
        let now = Utc::now();
        let mut report = LoadReport::default();

        for configuration in configurations {
            let Some(expression) = configuration.cron_expression() else {
                continue;
            };

            let job = match self
                .add_job(
                    configuration.id,
                    &configuration.user_id,
                    expression,
                    &configuration.auto_sync.timezone,
                )
                .await
            {
                Ok(job) => job,
                Err(err @ SchedulerError::InvalidCron { .. }) => {
                    warn!(config_id = configuration.id, error = %err, "skipping configuration");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            report.registered += 1;

            if let Some(due_at) = self.missed_fire(&configuration, &job, now) {
                self.dispatch_catch_up(configuration.id, due_at).await;
                report.catch_up += 1;
            }
        }

        info!(
            registered = report.registered,
            skipped = report.skipped,
            catch_up = report.catch_up,
            "Sync jobs loaded from store"
        );
        Ok(report)
    }

    /// Await every catch-up run dispatched so far.
    pub async fn wait_for_catch_up(&self) -> Vec<FireOutcome> {
        let handles: Vec<_> = self.catch_up_handles.lock().await.drain(..).collect();
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "catch-up task did not complete"),
            }
        }
        outcomes
    }

    pub async fn has_job(&self, config_id: i64) -> bool {
        self.jobs.lock().await.contains_key(&config_id)
    }

    /// Registered jobs ordered by configuration id
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.jobs.lock().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.config_id);
        jobs
    }

    /// Next fire of the job for `config_id` after now
    pub async fn next_fire(&self, config_id: i64) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(&config_id)?;
        job.cron.next_after(&Utc::now(), &job.timezone)
    }

    /// Run the job for `config_id` now, outside its schedule. Subject to the
    /// same coalescing and worker bound as scheduled fires.
    pub async fn trigger_now(&self, config_id: i64) -> FireOutcome {
        self.runner.fire(config_id).await
    }

    fn build_job(&self, config_id: i64, cron: &CronExpression, tz: Tz) -> SchedulerResult<Job> {
        let runner = Arc::clone(&self.runner);
        let cancel = self.cancellation.clone();
        let filter = cron.requires_day_filter().then(|| cron.clone());
        let job_id = job_id_for(config_id);

        Job::new_async_tz(cron.to_six_field().as_str(), tz, move |_id, _lock| {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            let filter = filter.clone();
            let span = job_span(&job_id, config_id);

            Box::pin(
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if let Some(cron) = filter {
                        if !cron.matches(&Utc::now().with_timezone(&tz)) {
                            debug!("day filter excludes today");
                            return;
                        }
                    }

                    let outcome = runner.fire(config_id).await;
                    debug!(outcome = %outcome, "scheduled fire finished");
                }
                .instrument(span),
            )
        })
        .map_err(|err| SchedulerError::JobRegistrationFailed(format!("{err:?}")))
    }

    /// Latest fire due after the later of `last_synced_at` and the start of
    /// the grace window.
    fn missed_fire(
        &self,
        configuration: &SyncConfiguration,
        job: &ScheduledJob,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let grace = chrono::Duration::seconds(
            i64::try_from(self.config.misfire_grace_seconds).unwrap_or(i64::MAX / 1_000),
        );
        let grace_start = now - grace;
        let not_before = configuration
            .last_synced_at
            .map_or(grace_start, |synced_at| synced_at.max(grace_start));

        job.cron.latest_fire_between(&not_before, &now, &job.timezone)
    }

    async fn dispatch_catch_up(&self, config_id: i64, due_at: DateTime<Utc>) {
        info!(config_id, due_at = %due_at, "dispatching catch-up run for missed fire");

        let runner = Arc::clone(&self.runner);
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => FireOutcome::Misfired,
                outcome = runner.fire_scheduled(config_id, due_at) => outcome,
            }
        });
        self.catch_up_handles.lock().await.push(handle);
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncScheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use calsync_domain::{Result as DomainResult, SyncCounts};
    use chrono::Timelike;

    use super::*;

    struct CountingExecutor {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl SyncJobExecutor for CountingExecutor {
        async fn run_configuration(&self, _config_id: i64) -> DomainResult<SyncCounts> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(SyncCounts { created: 0, updated: 1, deleted: 0 })
        }
    }

    struct StaticStore {
        configurations: Vec<SyncConfiguration>,
    }

    #[async_trait]
    impl ConfigurationStore for StaticStore {
        async fn get_configuration(&self, config_id: i64) -> DomainResult<Option<SyncConfiguration>> {
            Ok(self.configurations.iter().find(|c| c.id == config_id).cloned())
        }

        async fn list_schedulable(&self) -> DomainResult<Vec<SyncConfiguration>> {
            Ok(self.configurations.iter().filter(|c| c.is_schedulable()).cloned().collect())
        }

        async fn mark_synced(&self, _config_id: i64, _synced_at: DateTime<Utc>) -> DomainResult<()> {
            Ok(())
        }
    }

    fn scheduled_config(id: i64, cron: &str, timezone: &str) -> SyncConfiguration {
        let mut config = SyncConfiguration::new("user-1", "personal", "work");
        config.id = id;
        config.auto_sync.enabled = true;
        config.auto_sync.cron_expression = Some(cron.to_string());
        config.auto_sync.timezone = timezone.to_string();
        config
    }

    fn scheduler_with(configurations: Vec<SyncConfiguration>) -> (SyncScheduler, Arc<CountingExecutor>) {
        let executor = Arc::new(CountingExecutor { runs: AtomicUsize::new(0) });
        let store = Arc::new(StaticStore { configurations });
        (SyncScheduler::new(SchedulerConfig::default(), executor.clone(), store), executor)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_rejects_double_start_and_stop() {
        let (mut scheduler, _) = scheduler_with(Vec::new());

        assert!(matches!(scheduler.shutdown().await, Err(SchedulerError::NotRunning)));
        scheduler.start().await.expect("scheduler starts");
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));
        scheduler.shutdown().await.expect("scheduler stops");
        assert!(!scheduler.is_running());

        scheduler.start().await.expect("scheduler restarts");
        scheduler.shutdown().await.expect("scheduler stops again");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_job_requires_a_running_scheduler() {
        let (scheduler, _) = scheduler_with(Vec::new());
        let result = scheduler.add_job(1, "user-1", "*/15 * * * *", "UTC").await;
        assert!(matches!(result, Err(SchedulerError::NotRunning)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_job_validates_cron_and_falls_back_to_utc() {
        let (mut scheduler, _) = scheduler_with(Vec::new());
        scheduler.start().await.expect("scheduler starts");

        let rejected = scheduler.add_job(1, "user-1", "61 * * * *", "UTC").await;
        assert!(matches!(rejected, Err(SchedulerError::InvalidCron { .. })));
        assert!(!scheduler.has_job(1).await);

        let job = scheduler
            .add_job(1, "user-1", "30 9 * * 1-5", "Mars/Olympus_Mons")
            .await
            .expect("unknown timezone is not fatal");
        assert_eq!(job.timezone, Tz::UTC);
        assert_eq!(job.job_id, "sync_1");

        let berlin = scheduler
            .add_job(2, "user-1", "0 9 1 * MON", "Europe/Berlin")
            .await
            .expect("day-filtered schedule registers");
        assert_eq!(berlin.timezone, chrono_tz::Europe::Berlin);

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn re_adding_a_job_replaces_it() {
        let (mut scheduler, _) = scheduler_with(Vec::new());
        scheduler.start().await.expect("scheduler starts");

        scheduler.add_job(5, "user-1", "0 * * * *", "UTC").await.expect("first registration");
        scheduler.add_job(5, "user-1", "15 8 * * *", "UTC").await.expect("second registration");

        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].cron.as_str(), "15 8 * * *");

        let next = scheduler.next_fire(5).await.expect("next fire computed");
        assert_eq!((next.hour(), next.minute()), (8, 15));

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_job_is_a_no_op_for_unknown_ids() {
        let (mut scheduler, _) = scheduler_with(Vec::new());
        assert!(!scheduler.remove_job(3).await.expect("no-op while stopped"));

        scheduler.start().await.expect("scheduler starts");
        assert!(!scheduler.remove_job(3).await.expect("no-op for unknown job"));

        scheduler.add_job(3, "user-1", "0 6 * * *", "UTC").await.expect("registered");
        assert!(scheduler.remove_job(3).await.expect("removal succeeds"));
        assert!(!scheduler.has_job(3).await);
        assert!(scheduler.next_fire(3).await.is_none());

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_all_registers_schedulable_and_skips_invalid() {
        let mut inactive = scheduled_config(3, "0 7 * * *", "UTC");
        inactive.is_active = false;
        let mut disabled = scheduled_config(4, "0 7 * * *", "UTC");
        disabled.auto_sync.enabled = false;
        let mut blank = scheduled_config(5, "0 7 * * *", "UTC");
        blank.auto_sync.cron_expression = Some("   ".into());

        let mut recent = scheduled_config(1, "0 0 1 1 *", "America/New_York");
        recent.last_synced_at = Some(Utc::now());

        let (mut scheduler, executor) = scheduler_with(vec![
            recent,
            scheduled_config(2, "not a cron", "UTC"),
            inactive,
            disabled,
            blank,
        ]);
        scheduler.start().await.expect("scheduler starts");

        let report = scheduler.load_all_from_store().await.expect("load succeeds");
        assert_eq!(report, LoadReport { registered: 1, skipped: 1, catch_up: 0 });
        assert!(scheduler.has_job(1).await);
        assert!(!scheduler.has_job(2).await);
        assert!(scheduler.wait_for_catch_up().await.is_empty());
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missed_fire_within_grace_runs_once_on_load() {
        let due = Utc::now() - chrono::Duration::minutes(2);
        let cron = format!("{} {} * * *", due.minute(), due.hour());

        let mut missed = scheduled_config(10, &cron, "UTC");
        missed.last_synced_at = Some(due - chrono::Duration::days(1));
        let mut already_synced = scheduled_config(11, &cron, "UTC");
        already_synced.last_synced_at = Some(Utc::now());

        let (mut scheduler, executor) = scheduler_with(vec![missed, already_synced]);
        scheduler.start().await.expect("scheduler starts");

        let report = scheduler.load_all_from_store().await.expect("load succeeds");
        assert_eq!(report.registered, 2);
        assert_eq!(report.catch_up, 1);

        let outcomes = scheduler.wait_for_catch_up().await;
        assert_eq!(
            outcomes,
            vec![FireOutcome::Completed(SyncCounts { created: 0, updated: 1, deleted: 0 })]
        );
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fire_older_than_grace_is_not_caught_up() {
        let due = Utc::now() - chrono::Duration::minutes(10);
        let cron = format!("{} {} * * *", due.minute(), due.hour());
        let mut stale = scheduled_config(20, &cron, "UTC");
        stale.last_synced_at = Some(due - chrono::Duration::days(1));

        let (mut scheduler, executor) = scheduler_with(vec![stale]);
        scheduler.start().await.expect("scheduler starts");

        let report = scheduler.load_all_from_store().await.expect("load succeeds");
        assert_eq!(report, LoadReport { registered: 1, skipped: 0, catch_up: 0 });
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await.expect("scheduler stops");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trigger_now_runs_through_the_shared_runner() {
        let (scheduler, executor) = scheduler_with(Vec::new());
        let outcome = scheduler.trigger_now(42).await;
        assert!(matches!(outcome, FireOutcome::Completed(_)));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
    }
}
