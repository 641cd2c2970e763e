//! Sync service - manual and scheduled entry point
//!
//! Wraps one orchestrator pass with configuration lookup, fresh credential
//! resolution and the run log. Both the manual trigger and the scheduler go
//! through [`SyncService::run_configuration`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_domain::constants::DEFAULT_JOB_TIMEOUT_SECS;
use calsync_domain::{
    AccountSide, CalSyncError, Credentials, Result, SyncConfiguration, SyncCounts, SyncRun,
};
use tracing::{error, info, instrument, warn};

use super::orchestrator::{SyncOrchestrator, SyncRequest};
use super::ports::{
    Clock, ConfigurationStore, CredentialProvider, SyncJobExecutor, SyncRunRepository,
    SystemClock,
};

const MISSING_CREDENTIALS: &str = "OAuth credentials not found";

/// Sync service
pub struct SyncService {
    configs: Arc<dyn ConfigurationStore>,
    credentials: Arc<dyn CredentialProvider>,
    runs: Arc<dyn SyncRunRepository>,
    orchestrator: SyncOrchestrator,
    clock: Arc<dyn Clock>,
    run_timeout: Duration,
}

impl SyncService {
    /// Create a new sync service
    pub fn new(
        configs: Arc<dyn ConfigurationStore>,
        credentials: Arc<dyn CredentialProvider>,
        runs: Arc<dyn SyncRunRepository>,
        orchestrator: SyncOrchestrator,
    ) -> Self {
        Self {
            configs,
            credentials,
            runs,
            orchestrator,
            clock: Arc::new(SystemClock),
            run_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
        }
    }

    /// Use `clock` for run timestamps; the orchestrator keeps its own.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upper bound for one reconciliation pass. A pass that exceeds it is
    /// abandoned and its run recorded as failed.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Run a full pass for `config_id`.
    ///
    /// # Errors
    /// - `NotFound` if the configuration does not exist
    /// - `InvalidInput` if it is inactive
    /// - `Auth` if credentials for either side are missing; a failed run is
    ///   recorded before returning
    /// - any error of the pass itself, after recording the failed run
    #[instrument(skip(self))]
    pub async fn run_configuration(&self, config_id: i64) -> Result<SyncCounts> {
        let config = self
            .configs
            .get_configuration(config_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("sync configuration {config_id}")))?;
        if !config.is_active {
            return Err(CalSyncError::InvalidInput(format!(
                "sync configuration {config_id} is inactive"
            )));
        }

        let Some((source_creds, dest_creds)) = self.resolve_credentials(&config).await? else {
            let now = self.clock.now();
            let mut run = SyncRun::running(config.id, config.direction, None, now);
            run.fail(MISSING_CREDENTIALS, now);
            self.runs.record_run(&run).await?;
            warn!(user_id = %config.user_id, "Credentials missing; run recorded as failed");
            return Err(CalSyncError::Auth(MISSING_CREDENTIALS.to_string()));
        };

        let window = self.orchestrator.window_for(config.lookahead_days);
        let mut run =
            SyncRun::running(config.id, config.direction, Some(window), self.clock.now());
        self.runs.record_run(&run).await?;
        let mut open = OpenRun::new(run.clone(), Arc::clone(&self.runs), Arc::clone(&self.clock));

        let request = SyncRequest::for_configuration(&config, source_creds, dest_creds);
        let result =
            match tokio::time::timeout(self.run_timeout, self.orchestrator.run_sync(&request)).await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(CalSyncError::Network(format!(
                    "sync run timed out after {}s",
                    self.run_timeout.as_secs()
                ))),
            };

        open.disarm();
        match result {
            Ok(counts) => {
                let finished = self.clock.now();
                run.succeed(counts, finished);
                self.runs.finish_run(&run).await?;
                self.configs.mark_synced(config.id, finished).await?;
                info!(%counts, run_id = %run.id, "Sync run succeeded");
                Ok(counts)
            }
            Err(err) => {
                run.fail(err.to_string(), self.clock.now());
                if let Err(log_err) = self.runs.finish_run(&run).await {
                    error!(error = %log_err, "Failed to record failed sync run");
                }
                error!(error = %err, kind = err.label(), run_id = %run.id, "Sync run failed");
                Err(err)
            }
        }
    }

    /// Most recent runs of a configuration, newest first
    pub async fn recent_runs(&self, config_id: i64, limit: usize) -> Result<Vec<SyncRun>> {
        self.runs.recent_runs(config_id, limit).await
    }

    async fn resolve_credentials(
        &self,
        config: &SyncConfiguration,
    ) -> Result<Option<(Credentials, Credentials)>> {
        let source = self.credentials.get_credentials(&config.user_id, AccountSide::Source).await?;
        let dest =
            self.credentials.get_credentials(&config.user_id, AccountSide::Destination).await?;
        Ok(source.zip(dest))
    }
}

const CANCELLED_RUN: &str = "sync run cancelled before completion";

/// A run row still marked `running`.
///
/// If the pass is dropped before [`OpenRun::disarm`] (the caller timed out
/// or a shutdown cancelled it), the row is finished as failed on a
/// background task so it never stays `running`.
struct OpenRun {
    run: Option<SyncRun>,
    runs: Arc<dyn SyncRunRepository>,
    clock: Arc<dyn Clock>,
}

impl OpenRun {
    fn new(run: SyncRun, runs: Arc<dyn SyncRunRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { run: Some(run), runs, clock }
    }

    /// The pass reached its own outcome; the caller finishes the run.
    fn disarm(&mut self) {
        self.run = None;
    }
}

impl Drop for OpenRun {
    fn drop(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        run.fail(CANCELLED_RUN, self.clock.now());
        warn!(run_id = %run.id, config_id = run.config_id, "Sync run dropped mid-pass");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runs = Arc::clone(&self.runs);
                handle.spawn(async move {
                    if let Err(err) = runs.finish_run(&run).await {
                        error!(error = %err, run_id = %run.id, "Failed to close cancelled sync run");
                    }
                });
            }
            Err(_) => error!(run_id = %run.id, "No runtime to close cancelled sync run"),
        }
    }
}

#[async_trait]
impl SyncJobExecutor for SyncService {
    async fn run_configuration(&self, config_id: i64) -> Result<SyncCounts> {
        SyncService::run_configuration(self, config_id).await
    }
}
